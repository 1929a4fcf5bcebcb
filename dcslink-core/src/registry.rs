//! Address registry: memory address -> field descriptors.
//!
//! Built as a pure function from the merged schema controls, and rebuilt
//! wholesale whenever the active aircraft changes. Integer outputs register
//! at their single word address; string outputs register one entry per byte
//! address they span, since any word touching the span carries bytes for
//! them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::schema::{ControlDef, OutputKind};

/// Schema-derived metadata describing how to decode one named field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub id: Arc<str>,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer { mask: u16, shift: u8 },
    Text { base: u16, length: usize },
}

/// Mapping from address to the ordered field descriptors registered there.
///
/// Multiple descriptors may share an address (several bitfields packed into
/// one word). Never mutated incrementally — replaced as a whole.
#[derive(Debug, Clone, Default)]
pub struct AddressRegistry {
    map: HashMap<u16, Vec<FieldDescriptor>>,
}

impl AddressRegistry {
    /// Build a registry from merged schema controls.
    pub fn from_controls(controls: &[ControlDef]) -> Self {
        let mut registry = AddressRegistry::default();

        for control in controls {
            let id: Arc<str> = Arc::from(control.identifier.as_str());
            for output in &control.outputs {
                match output.kind {
                    OutputKind::Integer => {
                        registry.register(
                            output.address,
                            FieldDescriptor {
                                id: id.clone(),
                                kind: FieldKind::Integer {
                                    mask: output.mask,
                                    shift: output.shift_by,
                                },
                            },
                        );
                    }
                    OutputKind::String => {
                        let kind = FieldKind::Text {
                            base: output.address,
                            length: output.max_length,
                        };
                        for i in 0..output.max_length {
                            registry.register(
                                output.address.wrapping_add(i as u16),
                                FieldDescriptor {
                                    id: id.clone(),
                                    kind,
                                },
                            );
                        }
                    }
                }
            }
        }

        registry
    }

    /// Register a descriptor, keeping at most one per (field, kind) per
    /// address. Documents loaded twice must not double-dispatch.
    fn register(&mut self, address: u16, descriptor: FieldDescriptor) {
        let entry = self.map.entry(address).or_default();
        if entry
            .iter()
            .any(|d| d.id == descriptor.id && d.kind == descriptor.kind)
        {
            return;
        }
        entry.push(descriptor);
    }

    /// Descriptors registered at `address`, in registration order.
    pub fn lookup(&self, address: u16) -> Option<&[FieldDescriptor]> {
        self.map.get(&address).map(Vec::as_slice)
    }

    /// Every registered descriptor, across all addresses.
    pub fn descriptors(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.map.values().flatten()
    }

    /// Number of addresses with at least one descriptor.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
