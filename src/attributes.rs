//
// attributes.rs
// Dicom-Volume-Tools-rs
//
// Canonical attribute keys (keyword or tag pair resolved once to a tag), typed values and ordered attribute sets.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt;
use std::str::FromStr;

use dicom::core::dictionary::DataDictionary;
use dicom::core::value::{Value, C};
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;

use crate::error::{Result, ToolError};

/// A DICOM element identifier. Keyword and tag-pair spellings of the same
/// element parse to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeKey(Tag);

impl AttributeKey {
    pub const fn new(tag: Tag) -> Self {
        AttributeKey(tag)
    }

    pub fn tag(self) -> Tag {
        self.0
    }

    /// Accepts `Modality`, `(0008,0060)`, `(0x0008,0x0060)`, `0x00080060`,
    /// `00080060` and `0008,0060`.
    pub fn parse(input: &str) -> Result<Self> {
        let text = input.trim();
        if text.is_empty() {
            return Err(ToolError::UnknownAttribute(input.to_string()));
        }

        let inner = text
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .unwrap_or(text);

        if let Some((group, element)) = inner.split_once(',') {
            return match (parse_hex_u16(group), parse_hex_u16(element)) {
                (Some(g), Some(e)) => Ok(AttributeKey(Tag(g, e))),
                _ => Err(ToolError::UnknownAttribute(input.to_string())),
            };
        }

        let digits = strip_hex_prefix(inner);
        if digits.len() == 8 && digits.chars().all(|c| c.is_ascii_hexdigit()) {
            if let Ok(raw) = u32::from_str_radix(digits, 16) {
                return Ok(AttributeKey(Tag((raw >> 16) as u16, (raw & 0xFFFF) as u16)));
            }
        }

        StandardDataDictionary
            .by_name(inner)
            .map(|entry| AttributeKey(entry.tag.inner()))
            .ok_or_else(|| ToolError::UnknownAttribute(input.to_string()))
    }

    /// Standard keyword of the element, if the dictionary knows it.
    pub fn keyword(self) -> Option<&'static str> {
        StandardDataDictionary.by_tag(self.0).map(|e| e.alias)
    }

    /// VR from the dictionary; unknown (e.g. private) elements default to LO.
    pub fn default_vr(self) -> VR {
        StandardDataDictionary
            .by_tag(self.0)
            .map(|e| e.vr.relaxed())
            .unwrap_or(VR::LO)
    }

    /// Hexadecimal notation used for elements without a keyword.
    pub fn hex(self) -> String {
        format!("0x{:04x}{:04x}", self.0.group(), self.0.element())
    }

    /// Keyword when known, hexadecimal notation otherwise.
    pub fn label(self) -> String {
        self.keyword()
            .map(str::to_string)
            .unwrap_or_else(|| self.hex())
    }

    pub fn is_file_meta(self) -> bool {
        self.0.group() == 0x0002
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.keyword() {
            Some(keyword) => write!(f, "{keyword}"),
            None => write!(f, "({:04X},{:04X})", self.0.group(), self.0.element()),
        }
    }
}

impl FromStr for AttributeKey {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self> {
        AttributeKey::parse(s)
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

fn parse_hex_u16(s: &str) -> Option<u16> {
    let digits = strip_hex_prefix(s);
    if digits.is_empty() || digits.len() > 4 {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

/// Value of an attribute, normalised against its VR.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Empty,
    Text(String),
    Texts(Vec<String>),
    Int(i64),
    Ints(Vec<i64>),
    Float(f64),
    Floats(Vec<f64>),
    Binary(Vec<u8>),
}

#[derive(Clone, Copy, PartialEq)]
enum VrKind {
    Text,
    IntegerString,
    DecimalString,
    Integer,
    Float,
    Binary,
    TagList,
    Sequence,
}

fn vr_kind(vr: VR) -> VrKind {
    match vr {
        VR::IS => VrKind::IntegerString,
        VR::DS => VrKind::DecimalString,
        VR::US | VR::SS | VR::UL | VR::SL | VR::UV | VR::SV => VrKind::Integer,
        VR::FL | VR::FD => VrKind::Float,
        VR::OB | VR::OW | VR::OF | VR::OD | VR::OL | VR::OV | VR::UN => VrKind::Binary,
        VR::AT => VrKind::TagList,
        VR::SQ => VrKind::Sequence,
        _ => VrKind::Text,
    }
}

impl AttributeValue {
    /// Parse a raw command-line value; multiple values are separated by `\`.
    pub fn parse_for(vr: VR, raw: &str) -> std::result::Result<Self, String> {
        let parts: Vec<&str> = raw.split('\\').map(str::trim).collect();
        match vr_kind(vr) {
            VrKind::IntegerString | VrKind::Integer => {
                let values = parts
                    .iter()
                    .map(|p| p.parse::<i64>().map_err(|e| format!("{p:?}: {e}")))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Self::from_ints(values))
            }
            VrKind::DecimalString | VrKind::Float => {
                let values = parts
                    .iter()
                    .map(|p| p.parse::<f64>().map_err(|e| format!("{p:?}: {e}")))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Self::from_floats(values))
            }
            VrKind::Binary => hex::decode(raw.trim())
                .map(AttributeValue::Binary)
                .map_err(|e| format!("expected hex encoded bytes: {e}")),
            VrKind::Sequence => Err("sequences cannot be given as attribute values".into()),
            VrKind::Text | VrKind::TagList => {
                if raw.is_empty() {
                    Ok(AttributeValue::Empty)
                } else {
                    Ok(Self::from_texts(raw.split('\\').map(str::to_string).collect()))
                }
            }
        }
    }

    pub fn from_texts(mut values: Vec<String>) -> Self {
        match values.len() {
            0 => AttributeValue::Empty,
            1 => AttributeValue::Text(values.remove(0)),
            _ => AttributeValue::Texts(values),
        }
    }

    pub fn from_ints(mut values: Vec<i64>) -> Self {
        match values.len() {
            0 => AttributeValue::Empty,
            1 => AttributeValue::Int(values.remove(0)),
            _ => AttributeValue::Ints(values),
        }
    }

    pub fn from_floats(mut values: Vec<f64>) -> Self {
        match values.len() {
            0 => AttributeValue::Empty,
            1 => AttributeValue::Float(values.remove(0)),
            _ => AttributeValue::Floats(values),
        }
    }

    /// Convert a decoded DICOM value into the normalised representation.
    pub fn from_primitive(vr: VR, value: &PrimitiveValue) -> Self {
        if value.multiplicity() == 0 {
            return AttributeValue::Empty;
        }
        match vr_kind(vr) {
            VrKind::Binary => AttributeValue::Binary(value.to_bytes().into_owned()),
            VrKind::Integer | VrKind::IntegerString => value
                .to_multi_int::<i64>()
                .map(Self::from_ints)
                .unwrap_or_else(|_| Self::texts_of(value)),
            VrKind::Float | VrKind::DecimalString => value
                .to_multi_float64()
                .map(Self::from_floats)
                .unwrap_or_else(|_| Self::texts_of(value)),
            _ => Self::texts_of(value),
        }
    }

    fn texts_of(value: &PrimitiveValue) -> Self {
        let texts = value
            .to_multi_str()
            .iter()
            .map(|s| s.trim_end_matches([' ', '\0']).to_string())
            .collect();
        Self::from_texts(texts)
    }

    /// Re-type the value for `vr`, e.g. numbers given for a text VR become text.
    pub fn normalize_for(self, vr: VR) -> std::result::Result<Self, String> {
        let kind = vr_kind(vr);
        let value = match (kind, self) {
            (_, AttributeValue::Empty) => AttributeValue::Empty,
            (VrKind::Sequence, _) => return Err("sequences are not supported".into()),
            (VrKind::Text | VrKind::TagList, v) => Self::from_texts(v.as_texts()),
            (VrKind::Integer | VrKind::IntegerString, v) => match v.as_ints() {
                Some(values) => Self::from_ints(values),
                None if kind == VrKind::IntegerString => Self::from_texts(v.as_texts()),
                None => return Err(format!("expected integer value(s), got {v}")),
            },
            (VrKind::Float | VrKind::DecimalString, v) => match v.as_floats() {
                Some(values) => Self::from_floats(values),
                None if kind == VrKind::DecimalString => Self::from_texts(v.as_texts()),
                None => return Err(format!("expected numeric value(s), got {v}")),
            },
            (VrKind::Binary, AttributeValue::Binary(bytes)) => AttributeValue::Binary(bytes),
            (VrKind::Binary, v) => return Err(format!("expected binary value, got {v}")),
        };
        Ok(value)
    }

    pub fn as_texts(&self) -> Vec<String> {
        match self {
            AttributeValue::Empty => Vec::new(),
            AttributeValue::Text(s) => vec![s.clone()],
            AttributeValue::Texts(v) => v.clone(),
            AttributeValue::Int(i) => vec![i.to_string()],
            AttributeValue::Ints(v) => v.iter().map(i64::to_string).collect(),
            AttributeValue::Float(f) => vec![format_decimal(*f)],
            AttributeValue::Floats(v) => v.iter().map(|f| format_decimal(*f)).collect(),
            AttributeValue::Binary(b) => vec![hex::encode(b)],
        }
    }

    pub fn as_ints(&self) -> Option<Vec<i64>> {
        match self {
            AttributeValue::Int(i) => Some(vec![*i]),
            AttributeValue::Ints(v) => Some(v.clone()),
            AttributeValue::Float(_) | AttributeValue::Floats(_) => {
                let floats = self.as_floats()?;
                floats
                    .iter()
                    .map(|f| (f.fract() == 0.0).then_some(*f as i64))
                    .collect()
            }
            AttributeValue::Text(_) | AttributeValue::Texts(_) => self
                .as_texts()
                .iter()
                .map(|s| s.trim().parse::<i64>().ok())
                .collect(),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<Vec<f64>> {
        match self {
            AttributeValue::Float(f) => Some(vec![*f]),
            AttributeValue::Floats(v) => Some(v.clone()),
            AttributeValue::Int(i) => Some(vec![*i as f64]),
            AttributeValue::Ints(v) => Some(v.iter().map(|i| *i as f64).collect()),
            AttributeValue::Text(_) | AttributeValue::Texts(_) => self
                .as_texts()
                .iter()
                .map(|s| s.trim().parse::<f64>().ok())
                .collect(),
            _ => None,
        }
    }

    /// Build the DICOM primitive for `vr`.
    pub fn to_primitive(&self, vr: VR) -> std::result::Result<PrimitiveValue, String> {
        if matches!(self, AttributeValue::Empty) {
            return Ok(PrimitiveValue::Empty);
        }
        let value = match vr_kind(vr) {
            VrKind::Sequence => return Err("sequences are not supported".into()),
            VrKind::Binary => match self {
                AttributeValue::Binary(bytes) => PrimitiveValue::from(bytes.clone()),
                other => return Err(format!("expected binary value, got {other}")),
            },
            VrKind::TagList => {
                let tags = self
                    .as_texts()
                    .iter()
                    .map(|s| AttributeKey::parse(s).map(AttributeKey::tag))
                    .collect::<Result<C<Tag>>>()
                    .map_err(|e| e.to_string())?;
                PrimitiveValue::Tags(tags)
            }
            VrKind::Text | VrKind::IntegerString | VrKind::DecimalString => {
                let texts = self.as_texts();
                if texts.len() == 1 {
                    PrimitiveValue::from(texts[0].clone())
                } else {
                    PrimitiveValue::Strs(texts.into_iter().collect())
                }
            }
            VrKind::Integer => {
                let ints = self
                    .as_ints()
                    .ok_or_else(|| format!("expected integer value(s), got {self}"))?;
                match vr {
                    VR::US => PrimitiveValue::U16(narrow(&ints)?),
                    VR::SS => PrimitiveValue::I16(narrow(&ints)?),
                    VR::UL => PrimitiveValue::U32(narrow(&ints)?),
                    VR::SL => PrimitiveValue::I32(narrow(&ints)?),
                    VR::UV => PrimitiveValue::U64(narrow(&ints)?),
                    _ => PrimitiveValue::I64(ints.into_iter().collect()),
                }
            }
            VrKind::Float => {
                let floats = self
                    .as_floats()
                    .ok_or_else(|| format!("expected numeric value(s), got {self}"))?;
                match vr {
                    VR::FL => PrimitiveValue::F32(floats.iter().map(|f| *f as f32).collect()),
                    _ => PrimitiveValue::F64(floats.into_iter().collect()),
                }
            }
        };
        Ok(value)
    }
}

fn narrow<T: TryFrom<i64>>(values: &[i64]) -> std::result::Result<C<T>, String> {
    values
        .iter()
        .map(|v| T::try_from(*v).map_err(|_| format!("value {v} out of range")))
        .collect()
}

/// Decimal string rendering that stays within the 16 characters allowed for DS.
pub fn format_decimal(value: f64) -> String {
    let plain = value.to_string();
    if plain.len() <= 16 {
        plain
    } else {
        format!("{value:.8e}")
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_texts().join("\\"))
    }
}

/// One element of an attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub key: AttributeKey,
    pub vr: VR,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new(key: AttributeKey, vr: VR, value: AttributeValue) -> Self {
        Attribute { key, vr, value }
    }

    /// Attribute with the dictionary VR and a value re-typed for it.
    pub fn with_default_vr(key: AttributeKey, value: AttributeValue) -> Result<Self> {
        let vr = key.default_vr();
        let value = value
            .normalize_for(vr)
            .map_err(|reason| ToolError::InvalidAttributeValue {
                key: key.label(),
                reason,
            })?;
        Ok(Attribute { key, vr, value })
    }

    pub fn to_element(&self) -> Result<DataElement<InMemDicomObject>> {
        let value = self
            .value
            .to_primitive(self.vr)
            .map_err(|reason| ToolError::InvalidAttributeValue {
                key: self.key.label(),
                reason,
            })?;
        Ok(DataElement::new(self.key.tag(), self.vr, value))
    }
}

/// Ordered, key-unique collection of attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    entries: Vec<Attribute>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.entries.iter()
    }

    pub fn get(&self, key: AttributeKey) -> Option<&Attribute> {
        self.entries.iter().find(|a| a.key == key)
    }

    pub fn get_tag(&self, tag: Tag) -> Option<&Attribute> {
        self.get(AttributeKey::new(tag))
    }

    pub fn contains(&self, key: AttributeKey) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace in place; returns the previous attribute.
    pub fn insert(&mut self, attribute: Attribute) -> Option<Attribute> {
        match self.entries.iter_mut().find(|a| a.key == attribute.key) {
            Some(slot) => Some(std::mem::replace(slot, attribute)),
            None => {
                self.entries.push(attribute);
                None
            }
        }
    }

    /// Parse `key` and `raw` (command-line form) and insert the result.
    pub fn insert_raw(&mut self, key: &str, raw: &str) -> Result<Option<Attribute>> {
        let key = AttributeKey::parse(key)?;
        let vr = key.default_vr();
        let value = AttributeValue::parse_for(vr, raw).map_err(|reason| {
            ToolError::InvalidAttributeValue {
                key: key.label(),
                reason,
            }
        })?;
        Ok(self.insert(Attribute::new(key, vr, value)))
    }

    pub fn remove(&mut self, key: AttributeKey) -> Option<Attribute> {
        let position = self.entries.iter().position(|a| a.key == key)?;
        Some(self.entries.remove(position))
    }

    /// Overlay `other` on top of `self`; `other` wins for shared keys.
    pub fn merge_from(&mut self, other: &AttributeSet) {
        for attribute in other.iter() {
            self.insert(attribute.clone());
        }
    }

    /// Split into (file meta group 0002, dataset) attributes.
    pub fn partition_file_meta(self) -> (AttributeSet, AttributeSet) {
        let (meta, data): (Vec<_>, Vec<_>) =
            self.entries.into_iter().partition(|a| a.key.is_file_meta());
        (AttributeSet { entries: meta }, AttributeSet { entries: data })
    }

    pub fn text(&self, tag: Tag) -> Option<String> {
        let attribute = self.get_tag(tag)?;
        let texts = attribute.value.as_texts();
        texts.into_iter().next().filter(|s| !s.is_empty())
    }

    pub fn floats(&self, tag: Tag) -> Option<Vec<f64>> {
        self.get_tag(tag).and_then(|a| a.value.as_floats())
    }

    /// Collect the primitive elements of a dataset. Pixel data, group lengths
    /// and sequences are left out.
    pub fn from_dicom(obj: &InMemDicomObject) -> Self {
        let mut set = AttributeSet::new();
        for element in obj.iter() {
            let tag = element.header().tag;
            if tag == tags::PIXEL_DATA || tag.element() == 0x0000 {
                continue;
            }
            match element.value() {
                Value::Primitive(p) => {
                    let vr = element.header().vr;
                    set.insert(Attribute::new(
                        AttributeKey::new(tag),
                        vr,
                        AttributeValue::from_primitive(vr, p),
                    ));
                }
                Value::Sequence(_) | Value::PixelSequence(_) => {
                    tracing::trace!("Skipping non-primitive element {}", AttributeKey::new(tag));
                }
            }
        }
        set
    }

    /// Put every attribute into `obj`, replacing existing elements.
    pub fn apply_to(&self, obj: &mut InMemDicomObject) -> Result<()> {
        for attribute in self.iter() {
            obj.put(attribute.to_element()?);
        }
        Ok(())
    }
}

impl FromIterator<Attribute> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut set = AttributeSet::new();
        for attribute in iter {
            set.insert(attribute);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_and_tag_forms_resolve_to_the_same_key() {
        let expected = AttributeKey::new(Tag(0x0008, 0x0060));
        for form in [
            "Modality",
            "(0008,0060)",
            "(0x0008,0x0060)",
            "0x00080060",
            "00080060",
            "0008,0060",
        ] {
            assert_eq!(AttributeKey::parse(form).expect(form), expected, "{form}");
        }
        assert_eq!(expected.keyword(), Some("Modality"));
        assert_eq!(expected.hex(), "0x00080060");
    }

    #[test]
    fn unknown_keywords_are_rejected() {
        assert!(matches!(
            AttributeKey::parse("NotAnAttribute"),
            Err(ToolError::UnknownAttribute(_))
        ));
        assert!(AttributeKey::parse("(12345,0010)").is_err());
    }

    #[test]
    fn private_tags_use_hex_labels() {
        let key = AttributeKey::parse("0x00091001").expect("private tag");
        assert_eq!(key.keyword(), None);
        assert_eq!(key.label(), "0x00091001");
    }

    #[test]
    fn raw_values_follow_the_vr() {
        assert_eq!(
            AttributeValue::parse_for(VR::US, "512").unwrap(),
            AttributeValue::Int(512)
        );
        assert_eq!(
            AttributeValue::parse_for(VR::DS, "0.5\\0.75").unwrap(),
            AttributeValue::Floats(vec![0.5, 0.75])
        );
        assert_eq!(
            AttributeValue::parse_for(VR::CS, "ORIGINAL\\PRIMARY").unwrap(),
            AttributeValue::Texts(vec!["ORIGINAL".into(), "PRIMARY".into()])
        );
        assert!(AttributeValue::parse_for(VR::US, "abc").is_err());
    }

    #[test]
    fn numbers_for_text_vrs_become_text() {
        let value = AttributeValue::Int(20240101).normalize_for(VR::DA).unwrap();
        assert_eq!(value, AttributeValue::Text("20240101".into()));
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut set = AttributeSet::new();
        set.insert_raw("Modality", "CT").unwrap();
        set.insert_raw("PatientID", "P1").unwrap();
        set.insert_raw("(0008,0060)", "MR").unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.text(tags::MODALITY).as_deref(), Some("MR"));
        let order: Vec<_> = set.iter().map(|a| a.key.label()).collect();
        assert_eq!(order, vec!["Modality", "PatientID"]);
    }

    #[test]
    fn dicom_objects_round_trip_through_attribute_sets() {
        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("MR")));
        obj.put(DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(4_u16)));
        obj.put(DataElement::new(
            tags::PIXEL_SPACING,
            VR::DS,
            PrimitiveValue::Strs(["0.5".to_string(), "0.25".to_string()].into_iter().collect()),
        ));

        let set = AttributeSet::from_dicom(&obj);
        assert_eq!(
            set.get_tag(tags::PIXEL_SPACING).unwrap().value,
            AttributeValue::Floats(vec![0.5, 0.25])
        );
        assert_eq!(set.get_tag(tags::ROWS).unwrap().value, AttributeValue::Int(4));

        let mut restored = InMemDicomObject::new_empty();
        set.apply_to(&mut restored).unwrap();
        let rows = restored.element(tags::ROWS).unwrap().to_int::<u16>().unwrap();
        assert_eq!(rows, 4);
        let spacing = restored
            .element(tags::PIXEL_SPACING)
            .unwrap()
            .to_multi_float64()
            .unwrap();
        assert_eq!(spacing, vec![0.5, 0.25]);
    }

    #[test]
    fn long_decimals_fit_the_ds_limit() {
        assert_eq!(format_decimal(0.5), "0.5");
        assert!(format_decimal(0.1 + 0.2).len() <= 16);
    }
}
