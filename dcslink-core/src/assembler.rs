//! Field assembler: routes write events to field decoders and produces
//! named value notifications.
//!
//! Owns one decoder instance per field identifier, built eagerly when a
//! registry is installed. Both decoder kinds re-notify on every qualifying
//! update, not only on change; subscribers may rely on the repeated ticks,
//! so no suppression happens here.

use std::collections::HashMap;
use std::sync::Arc;

use crate::decode::{FieldDecoder, IntegerDecoder, TextDecoder};
use crate::registry::{AddressRegistry, FieldKind};
use crate::types::{Value, WriteEvent};

/// A named decoded value ready for subscriber dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub field: Arc<str>,
    pub value: Value,
}

/// Applies write events to the decoders registered for their address.
pub struct FieldAssembler {
    registry: AddressRegistry,
    decoders: HashMap<Arc<str>, FieldDecoder>,
}

impl FieldAssembler {
    /// Build an assembler with fresh decoder state for every field in the
    /// registry.
    pub fn new(registry: AddressRegistry) -> Self {
        let mut decoders: HashMap<Arc<str>, FieldDecoder> = HashMap::new();
        for desc in registry.descriptors() {
            decoders
                .entry(desc.id.clone())
                .or_insert_with(|| match desc.kind {
                    FieldKind::Integer { mask, shift } => {
                        FieldDecoder::Integer(IntegerDecoder::new(mask, shift))
                    }
                    FieldKind::Text { base, length } => {
                        FieldDecoder::Text(TextDecoder::new(base, length))
                    }
                });
        }
        FieldAssembler { registry, decoders }
    }

    /// Swap in a new registry, discarding all prior decoder state.
    ///
    /// Safe mid-stream: events decoded against the old registry are not
    /// reprocessed, and partially-filled string buffers are dropped.
    pub fn replace_registry(&mut self, registry: AddressRegistry) {
        *self = FieldAssembler::new(registry);
    }

    /// Apply one write event and collect the resulting notifications.
    ///
    /// Events at unregistered addresses are silently discarded — the schema
    /// only covers known fields. Each registered decoder is applied
    /// independently; one decoder ignoring a word (out-of-span bytes) never
    /// affects the others at the same address.
    pub fn apply(&mut self, event: WriteEvent) -> Vec<Notification> {
        let mut out = Vec::new();
        let Some(descriptors) = self.registry.lookup(event.address) else {
            return out;
        };

        for desc in descriptors {
            let Some(decoder) = self.decoders.get_mut(&desc.id) else {
                continue;
            };
            decoder.apply(event.address, event.word);

            match decoder {
                FieldDecoder::Integer(d) => {
                    if let Some(value) = d.value() {
                        out.push(Notification {
                            field: desc.id.clone(),
                            value: Value::Integer(value),
                        });
                    }
                }
                FieldDecoder::Text(d) => {
                    if d.is_complete() {
                        if let Some(value) = d.value() {
                            out.push(Notification {
                                field: desc.id.clone(),
                                value: Value::Text(trim_text(value)),
                            });
                        }
                    }
                }
            }
        }

        out
    }

    /// Apply a batch of write events in order.
    pub fn apply_all(&mut self, events: &[WriteEvent]) -> Vec<Notification> {
        events.iter().flat_map(|&ev| self.apply(ev)).collect()
    }

    /// The installed registry.
    pub fn registry(&self) -> &AddressRegistry {
        &self.registry
    }
}

/// Strip the padding the exporter leaves in string values: NUL fill bytes
/// anywhere, whitespace at the edges.
fn trim_text(s: &str) -> String {
    s.replace('\0', "").trim().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ControlDef, OutputDef, OutputKind};

    fn make_registry(controls: &[ControlDef]) -> AddressRegistry {
        AddressRegistry::from_controls(controls)
    }

    fn integer_control(id: &str, address: u16, mask: u16, shift: u8) -> ControlDef {
        ControlDef {
            identifier: id.to_string(),
            outputs: vec![OutputDef {
                kind: OutputKind::Integer,
                address,
                mask,
                shift_by: shift,
                max_length: 1,
            }],
        }
    }

    fn string_control(id: &str, address: u16, length: usize) -> ControlDef {
        ControlDef {
            identifier: id.to_string(),
            outputs: vec![OutputDef {
                kind: OutputKind::String,
                address,
                mask: 0xFFFF,
                shift_by: 0,
                max_length: length,
            }],
        }
    }

    fn event(address: u16, word: u16) -> WriteEvent {
        WriteEvent { address, word }
    }

    #[test]
    fn test_masked_integer_notification() {
        let registry = make_registry(&[integer_control("MASTER_ARM", 0x4500, 0x0001, 0)]);
        let mut asm = FieldAssembler::new(registry);

        let out = asm.apply(event(0x4500, 0x0007));
        assert_eq!(out.len(), 1);
        assert_eq!(&*out[0].field, "MASTER_ARM");
        assert_eq!(out[0].value, Value::Integer(1));
    }

    #[test]
    fn test_unregistered_address_discarded() {
        let registry = make_registry(&[integer_control("MASTER_ARM", 0x4500, 1, 0)]);
        let mut asm = FieldAssembler::new(registry);

        assert!(asm.apply(event(0x9999, 0xFFFF)).is_empty());
    }

    #[test]
    fn test_integer_renotifies_on_unchanged_value() {
        let registry = make_registry(&[integer_control("RPM", 0x5000, 0xFFFF, 0)]);
        let mut asm = FieldAssembler::new(registry);

        let first = asm.apply(event(0x5000, 1200));
        let second = asm.apply(event(0x5000, 1200));
        assert_eq!(first, second);
        assert_eq!(second[0].value, Value::Integer(1200));
    }

    #[test]
    fn test_packed_bitfields_each_notify() {
        let registry = make_registry(&[
            integer_control("FLAG_A", 0x4500, 0x0001, 0),
            integer_control("FLAG_B", 0x4500, 0x0002, 1),
        ]);
        let mut asm = FieldAssembler::new(registry);

        let out = asm.apply(event(0x4500, 0x0003));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].value, Value::Integer(1));
        assert_eq!(out[1].value, Value::Integer(1));
    }

    #[test]
    fn test_string_notifies_only_when_complete() {
        let registry = make_registry(&[string_control("PILOTNAME", 0x1000, 4)]);
        let mut asm = FieldAssembler::new(registry);

        let out = asm.apply(event(0x1000, u16::from_le_bytes([b'A', b'B'])));
        assert!(out.is_empty(), "incomplete buffer must not notify");

        let out = asm.apply(event(0x1002, u16::from_le_bytes([b'C', b'D'])));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, Value::Text("ABCD".into()));
    }

    #[test]
    fn test_string_value_trimmed() {
        let registry = make_registry(&[string_control("ACFT", 0x1000, 4)]);
        let mut asm = FieldAssembler::new(registry);

        asm.apply(event(0x1000, u16::from_le_bytes([b'A', b'B'])));
        let out = asm.apply(event(0x1002, u16::from_le_bytes([0x00, 0x00])));
        assert_eq!(out[0].value, Value::Text("AB".into()));
    }

    #[test]
    fn test_string_renotifies_after_completion() {
        let registry = make_registry(&[string_control("ACFT", 0x1000, 2)]);
        let mut asm = FieldAssembler::new(registry);

        asm.apply(event(0x1000, u16::from_le_bytes([b'O', b'K'])));
        // Same word again: still complete, notifies again.
        let out = asm.apply(event(0x1000, u16::from_le_bytes([b'O', b'K'])));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, Value::Text("OK".into()));
    }

    #[test]
    fn test_words_deliver_string_bytes_two_at_a_time() {
        // Words 0x0041 at 0x1000 and 0x0042 at 0x1002 fill a 4-byte buffer
        // as 41 00 42 00; NUL fill drops out of the reported value.
        let registry = make_registry(&[string_control("TAIL", 0x1000, 4)]);
        let mut asm = FieldAssembler::new(registry);

        asm.apply(event(0x1000, 0x0041));
        let out = asm.apply(event(0x1002, 0x0042));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, Value::Text("AB".into()));
    }

    #[test]
    fn test_replace_registry_drops_decoder_state() {
        let registry = make_registry(&[string_control("NAME", 0x1000, 4)]);
        let mut asm = FieldAssembler::new(registry);

        // Half-fill the buffer under the old registry.
        asm.apply(event(0x1000, u16::from_le_bytes([b'A', b'B'])));

        // New registry keeps the same field; its buffer starts empty.
        asm.replace_registry(make_registry(&[string_control("NAME", 0x1000, 4)]));
        let out = asm.apply(event(0x1002, u16::from_le_bytes([b'C', b'D'])));
        assert!(out.is_empty(), "old half-filled buffer must be discarded");
    }

    #[test]
    fn test_replace_registry_removes_stale_addresses() {
        let registry = make_registry(&[integer_control("OLD", 0x2000, 0xFFFF, 0)]);
        let mut asm = FieldAssembler::new(registry);
        assert_eq!(asm.apply(event(0x2000, 5)).len(), 1);

        asm.replace_registry(make_registry(&[integer_control("NEW", 0x3000, 0xFFFF, 0)]));
        assert!(asm.apply(event(0x2000, 5)).is_empty());
        assert_eq!(asm.apply(event(0x3000, 5)).len(), 1);
    }

    #[test]
    fn test_apply_all_preserves_order() {
        let registry = make_registry(&[
            integer_control("A", 0x0100, 0xFFFF, 0),
            integer_control("B", 0x0102, 0xFFFF, 0),
        ]);
        let mut asm = FieldAssembler::new(registry);

        let out = asm.apply_all(&[event(0x0100, 1), event(0x0102, 2)]);
        assert_eq!(out.len(), 2);
        assert_eq!(&*out[0].field, "A");
        assert_eq!(&*out[1].field, "B");
    }
}
