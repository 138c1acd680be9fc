//! Flow-definition attributes.
//!
//! The flow definition is a dotted hierarchical string describing the
//! payload shape (`"block.mpeg2video.pic."`, `"pic."`, `"sound.s16."`,
//! `"void."`). Pipes match on prefixes: a pipe accepting `"block."`
//! accepts any refinement of it.

use crate::udict::{AttrType, AttrValue};

use super::Uref;

const DEF: &str = "f.def";
const ID: &str = "f.id";
const NAME: &str = "f.name";
const END: &str = "f.end";

impl Uref {
    /// The flow-definition string.
    pub fn flow_def(&self) -> Option<&str> {
        self.udict.get_string(DEF)
    }

    pub fn set_flow_def(&mut self, def: &str) {
        self.udict.set(DEF, AttrValue::String(def.to_owned()));
    }

    /// True when the flow definition starts with `prefix`.
    pub fn flow_def_matches(&self, prefix: &str) -> bool {
        self.flow_def().is_some_and(|def| def.starts_with(prefix))
    }

    /// Numeric flow identifier (sub-stream selector).
    pub fn flow_id(&self) -> Option<u64> {
        self.udict.get_unsigned(ID)
    }

    pub fn set_flow_id(&mut self, id: u64) {
        self.udict.set(ID, AttrValue::Unsigned(id));
    }

    /// Human-readable flow name.
    pub fn flow_name(&self) -> Option<&str> {
        self.udict.get_string(NAME)
    }

    pub fn set_flow_name(&mut self, name: &str) {
        self.udict.set(NAME, AttrValue::String(name.to_owned()));
    }

    /// End-of-flow marker.
    pub fn flow_end(&self) -> bool {
        self.udict.get_void(END)
    }

    pub fn set_flow_end(&mut self) {
        self.udict.set(END, AttrValue::Void);
    }

    pub fn clear_flow_end(&mut self) {
        let _ = self.udict.delete(AttrType::Void, END);
    }
}

#[cfg(test)]
mod tests {
    use crate::udict::UdictMgr;
    use crate::uref::UrefMgr;

    #[test]
    fn test_flow_def_prefix_matching() {
        let mgr = UrefMgr::new(UdictMgr::new(2));
        let uref = mgr.alloc_flow("block.mpeg2video.pic.");
        assert!(uref.flow_def_matches("block."));
        assert!(uref.flow_def_matches("block.mpeg2video."));
        assert!(!uref.flow_def_matches("pic."));
    }

    #[test]
    fn test_flow_attrs() {
        let mgr = UrefMgr::new(UdictMgr::new(2));
        let mut uref = mgr.alloc_flow("sound.s16.");
        uref.set_flow_id(42);
        uref.set_flow_name("fre");
        assert_eq!(uref.flow_id(), Some(42));
        assert_eq!(uref.flow_name(), Some("fre"));
        assert!(!uref.flow_end());
        uref.set_flow_end();
        assert!(uref.flow_end());
        uref.clear_flow_end();
        assert!(!uref.flow_end());
    }

    #[test]
    fn test_no_flow_def() {
        let mgr = UrefMgr::new(UdictMgr::new(2));
        let uref = mgr.alloc();
        assert_eq!(uref.flow_def(), None);
        assert!(!uref.flow_def_matches("block."));
    }
}
