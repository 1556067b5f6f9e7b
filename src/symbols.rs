use super::ast::Prototype;
use super::ir::Slot;
use std::collections::HashMap;

/// Storage slots of the locals visible at the current point of one function.
#[derive(Debug, Default)]
pub struct NamedValues {
    slots: HashMap<String, Slot>,
}

impl NamedValues {
    pub fn new() -> NamedValues {
        NamedValues::default()
    }

    pub fn get(&self, name: &str) -> Option<Slot> {
        self.slots.get(name).cloned()
    }

    /// Binds `name` to `slot` and hands back the binding it shadows.
    pub fn bind(&mut self, name: &str, slot: Slot) -> Option<Slot> {
        self.slots.insert(name.to_owned(), slot)
    }

    /// Undoes a `bind`: the shadowed slot comes back, or the name goes away.
    pub fn restore(&mut self, name: &str, shadowed: Option<Slot>) {
        match shadowed {
            Some(slot) => {
                self.slots.insert(name.to_owned(), slot);
            }
            None => {
                self.slots.remove(name);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registered {
    pub proto: Prototype,
    /// Set once a body for this name compiled successfully.
    pub defined: bool,
}

/// Prototypes of every function seen in the session. Units come and go; this
/// is what lets a later unit re-declare and call an earlier function.
#[derive(Debug, Default)]
pub struct PrototypeRegistry {
    protos: HashMap<String, Registered>,
}

impl PrototypeRegistry {
    pub fn new() -> PrototypeRegistry {
        PrototypeRegistry::default()
    }

    pub fn get(&self, name: &str) -> Option<&Prototype> {
        self.protos.get(name).map(|r| &r.proto)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.protos.get(name).map_or(false, |r| r.defined)
    }

    /// Records `proto` as declared, returning whatever entry it replaces.
    pub fn register(&mut self, proto: Prototype) -> Option<Registered> {
        let name = proto.name.clone();
        self.protos.insert(
            name,
            Registered {
                proto,
                defined: false,
            },
        )
    }

    /// Puts back the entry displaced by `register`.
    pub fn restore(&mut self, name: &str, previous: Option<Registered>) {
        match previous {
            Some(entry) => {
                self.protos.insert(name.to_owned(), entry);
            }
            None => {
                self.protos.remove(name);
            }
        }
    }

    pub fn mark_defined(&mut self, name: &str) {
        if let Some(entry) = self.protos.get_mut(name) {
            entry.defined = true;
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Prototype> {
        self.protos.remove(name).map(|r| r.proto)
    }

    pub fn len(&self) -> usize {
        self.protos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protos.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bind_restore() {
        let mut values = NamedValues::new();
        assert_eq!(values.bind("x", Slot(0)), None);
        let shadowed = values.bind("x", Slot(3));
        assert_eq!(shadowed, Some(Slot(0)));
        assert_eq!(values.get("x"), Some(Slot(3)));
        values.restore("x", shadowed);
        assert_eq!(values.get("x"), Some(Slot(0)));

        let shadowed = values.bind("i", Slot(4));
        values.restore("i", shadowed);
        assert!(!values.contains("i"));
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_registry() {
        let mut protos = PrototypeRegistry::new();
        let prev = protos.register(Prototype::new("f", vec!["a".to_owned()]));
        assert!(prev.is_none());
        assert!(!protos.is_defined("f"));
        protos.mark_defined("f");
        assert!(protos.is_defined("f"));

        let prev = protos.register(Prototype::new("f", vec![]));
        assert_eq!(protos.get("f").unwrap().params.len(), 0);
        protos.restore("f", prev);
        assert_eq!(protos.get("f").unwrap().params, vec!["a".to_owned()]);
        assert!(protos.is_defined("f"));

        assert!(protos.remove("f").is_some());
        assert!(protos.is_empty());
    }
}
