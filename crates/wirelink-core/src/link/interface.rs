//! Shape of the interface a link calls on its peer.
//!
//! The remote adapter consults this table to validate every outgoing call and
//! to decide whether it waits for a response.

use std::fmt;
use tracing::warn;

/// What a remote method hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Returns {
    /// Fire-and-forget; no response frame is ever produced.
    Void,
    /// A value encoded with the link's codec.
    Value,
    /// Raw bytes, passed through undecoded.
    Bytes,
}

impl Returns {
    pub fn as_str(&self) -> &'static str {
        match self {
            Returns::Void => "void",
            Returns::Value => "value",
            Returns::Bytes => "bytes",
        }
    }
}

impl fmt::Display for Returns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Signature of one remote method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    pub name: String,
    pub arity: usize,
    pub returns: Returns,
}

/// A named set of method signatures.
#[derive(Debug, Clone, Default)]
pub struct Interface {
    name: String,
    methods: Vec<MethodSig>,
}

impl Interface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Declare a method. A repeated (name, arity) pair keeps the first declaration.
    pub fn method(mut self, name: impl Into<String>, arity: usize, returns: Returns) -> Self {
        let name = name.into();
        if name.is_empty() {
            warn!("Ignoring unnamed method on interface {}", self.name);
            return self;
        }
        if self.lookup(&name, arity).is_some() {
            warn!(
                "Interface {} already declares {}/{}; keeping the first declaration",
                self.name, name, arity
            );
            return self;
        }
        self.methods.push(MethodSig {
            name,
            arity,
            returns,
        });
        self
    }

    pub fn value(self, name: impl Into<String>, arity: usize) -> Self {
        self.method(name, arity, Returns::Value)
    }

    pub fn void(self, name: impl Into<String>, arity: usize) -> Self {
        self.method(name, arity, Returns::Void)
    }

    pub fn bytes(self, name: impl Into<String>, arity: usize) -> Self {
        self.method(name, arity, Returns::Bytes)
    }

    pub fn lookup(&self, name: &str, arity: usize) -> Option<&MethodSig> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.arity == arity)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodSig] {
        &self.methods
    }
}
