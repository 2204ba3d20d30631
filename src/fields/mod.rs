//! Schema analysis (component E) and the custom-field coder tagged union
//! (component D), per `spec.md` §3/§4.D/§4.E.

mod bool_field;
mod bytes;
mod int;
mod xor;

pub use bool_field::BoolCoder;
pub use bytes::BytesCoder;
pub use int::IntCoder;
pub use xor::XorCoder;

/// Number of bits used by the custom-schema block (`spec.md` §4.G) to tag
/// each field number with its custom type, or `NOT_CUSTOM` if the field is
/// handled by the residual proto path instead. 13 distinct tags fit in 4
/// bits (`spec.md` §4.G: "concretely 3 bits suffice if groups are
/// collapsed, else up to 5" — this implementation keeps each integer width
/// distinct rather than collapsing them, so it needs 4).
pub const CUSTOM_TYPE_TAG_BITS: u8 = 4;

/// One field's classification, as emitted in the custom-schema block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Double,
    Float,
    SInt8,
    SInt16,
    SInt32,
    SInt64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Bytes,
    Bool,
    /// Not custom-encoded: nested message, enum, repeated, map, or any type
    /// this coder doesn't special-case. Handled by the residual proto path.
    Other,
}

impl FieldKind {
    /// The tag written into the custom-schema block for this kind. `Other`
    /// maps to the reserved `0` ("not custom") tag.
    pub fn schema_tag(self) -> u64 {
        match self {
            FieldKind::Other => 0,
            FieldKind::Double => 1,
            FieldKind::Float => 2,
            FieldKind::SInt8 => 3,
            FieldKind::SInt16 => 4,
            FieldKind::SInt32 => 5,
            FieldKind::SInt64 => 6,
            FieldKind::UInt8 => 7,
            FieldKind::UInt16 => 8,
            FieldKind::UInt32 => 9,
            FieldKind::UInt64 => 10,
            FieldKind::Bytes => 11,
            FieldKind::Bool => 12,
        }
    }

    pub fn is_custom(self) -> bool {
        !matches!(self, FieldKind::Other)
    }

    pub fn is_signed_int(self) -> bool {
        matches!(
            self,
            FieldKind::SInt8 | FieldKind::SInt16 | FieldKind::SInt32 | FieldKind::SInt64
        )
    }

    pub fn is_unsigned_int(self) -> bool {
        matches!(
            self,
            FieldKind::UInt8 | FieldKind::UInt16 | FieldKind::UInt32 | FieldKind::UInt64
        )
    }
}

/// One field of a [`SchemaDescr`]'s message descriptor.
#[derive(Debug, Clone)]
pub struct FieldDescr {
    pub number: u32,
    pub kind: FieldKind,
}

/// External contract for a schema registry entry (`spec.md` §1/§3): an
/// opaque handle yielding a message descriptor and a stable deploy id used
/// to detect schema swaps. The schema registry itself is out of this
/// crate's scope; this trait is the interface a registry implementation
/// plugs into.
pub trait SchemaDescr {
    /// Opaque identifier; two descriptors with the same non-empty
    /// `deploy_id` are considered compatible (`spec.md` §4.H).
    fn deploy_id(&self) -> &str;

    fn fields(&self) -> &[FieldDescr];
}

/// A schema descriptor built directly from a field list, for callers that
/// don't have their own registry (and for this crate's own tests).
#[derive(Debug, Clone)]
pub struct StaticSchemaDescr {
    deploy_id: String,
    fields: Vec<FieldDescr>,
}

impl StaticSchemaDescr {
    pub fn new(deploy_id: impl Into<String>, fields: Vec<FieldDescr>) -> Self {
        Self {
            deploy_id: deploy_id.into(),
            fields,
        }
    }
}

impl SchemaDescr for StaticSchemaDescr {
    fn deploy_id(&self) -> &str {
        &self.deploy_id
    }

    fn fields(&self) -> &[FieldDescr] {
        &self.fields
    }
}

/// Per-variant coder state for one custom-encoded field (`spec.md` §9:
/// "tagged variants over switches... avoids virtual calls on the hot
/// path").
#[derive(Debug)]
pub enum CustomCoder {
    Double(XorCoder),
    Float(XorCoder),
    Int(IntCoder),
    Bytes(BytesCoder),
    Bool(BoolCoder),
}

impl CustomCoder {
    fn fresh(kind: FieldKind, bytes_dict_capacity: usize) -> Self {
        match kind {
            FieldKind::Double => CustomCoder::Double(XorCoder::new(64)),
            FieldKind::Float => CustomCoder::Float(XorCoder::new(32)),
            FieldKind::SInt8
            | FieldKind::SInt16
            | FieldKind::SInt32
            | FieldKind::SInt64
            | FieldKind::UInt8
            | FieldKind::UInt16
            | FieldKind::UInt32
            | FieldKind::UInt64 => CustomCoder::Int(IntCoder::new()),
            FieldKind::Bytes => CustomCoder::Bytes(BytesCoder::new(bytes_dict_capacity)),
            FieldKind::Bool => CustomCoder::Bool(BoolCoder),
            FieldKind::Other => unreachable!("Other fields never get a custom coder slot"),
        }
    }
}

/// A custom-encoded field, its classification, and its live coder state.
#[derive(Debug)]
pub struct CustomFieldSlot {
    pub field_number: u32,
    pub kind: FieldKind,
    pub coder: CustomCoder,
}

/// Component E: partitions a schema's fields into custom-encoded (sorted
/// ascending by field number, `spec.md` invariant 4) and residual (field
/// numbers in descriptor order). `previous` lets a schema swap reuse
/// already-allocated coder state for a field number whose `FieldKind`
/// didn't change (`spec.md` §4.E, "best-effort").
pub fn classify(
    descr: &dyn SchemaDescr,
    bytes_dict_capacity: usize,
    previous: Option<Vec<CustomFieldSlot>>,
) -> (Vec<CustomFieldSlot>, Vec<u32>) {
    let mut reusable: std::collections::HashMap<u32, CustomFieldSlot> = previous
        .into_iter()
        .flatten()
        .map(|slot| (slot.field_number, slot))
        .collect();

    let mut custom_fields = Vec::new();
    let mut residual_fields = Vec::new();

    for field in descr.fields() {
        if field.kind.is_custom() {
            let slot = match reusable.remove(&field.number) {
                Some(slot) if slot.kind == field.kind => slot,
                _ => CustomFieldSlot {
                    field_number: field.number,
                    kind: field.kind,
                    coder: CustomCoder::fresh(field.kind, bytes_dict_capacity),
                },
            };
            custom_fields.push(slot);
        } else {
            residual_fields.push(field.number);
        }
    }

    custom_fields.sort_by_key(|slot| slot.field_number);
    (custom_fields, residual_fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descr(fields: Vec<(u32, FieldKind)>) -> StaticSchemaDescr {
        StaticSchemaDescr::new(
            "v1",
            fields
                .into_iter()
                .map(|(number, kind)| FieldDescr { number, kind })
                .collect(),
        )
    }

    #[test]
    fn custom_fields_sorted_ascending_by_number() {
        let schema = descr(vec![
            (5, FieldKind::Bool),
            (1, FieldKind::Double),
            (3, FieldKind::Bytes),
        ]);
        let (custom, residual) = classify(&schema, 4, None);
        assert_eq!(
            custom.iter().map(|s| s.field_number).collect::<Vec<_>>(),
            vec![1, 3, 5]
        );
        assert!(residual.is_empty());
    }

    #[test]
    fn residual_fields_preserve_descriptor_order() {
        let schema = descr(vec![
            (1, FieldKind::Other),
            (2, FieldKind::Double),
            (3, FieldKind::Other),
        ]);
        let (custom, residual) = classify(&schema, 4, None);
        assert_eq!(custom.len(), 1);
        assert_eq!(residual, vec![1, 3]);
    }

    #[test]
    fn reclassification_reuses_compatible_slot() {
        let schema = descr(vec![(1, FieldKind::Double)]);
        let (custom, _) = classify(&schema, 4, None);
        if let CustomCoder::Double(coder) = &custom[0].coder {
            // Mutate state so we can tell whether it survives reclassification.
            let mut w = crate::bitstream::BitWriter::new();
            let mut coder = coder.clone();
            coder.write(&mut w, 42.0_f64.to_bits());
            let (custom2, _) = classify(&schema, 4, Some(vec![CustomFieldSlot {
                field_number: 1,
                kind: FieldKind::Double,
                coder: CustomCoder::Double(coder),
            }]));
            if let CustomCoder::Double(reused) = &custom2[0].coder {
                assert!(reused.has_seen_value());
            } else {
                panic!("expected Double coder");
            }
        } else {
            panic!("expected Double coder");
        }
    }

    #[test]
    fn incompatible_kind_change_gets_fresh_state() {
        let old_schema = descr(vec![(1, FieldKind::Double)]);
        let (custom, _) = classify(&old_schema, 4, None);
        let new_schema = descr(vec![(1, FieldKind::Bool)]);
        let (custom2, _) = classify(&new_schema, 4, Some(custom));
        assert!(matches!(custom2[0].coder, CustomCoder::Bool(_)));
    }
}
