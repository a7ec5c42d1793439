//
// header_store.rs
// Dicom-Volume-Tools-rs
//
// Reads and writes attribute sets as YAML or JSON header store files, keeping element order.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt;
use std::io::Write;
use std::path::Path;

use dicom::core::VR;
use dicom::object::{FileMetaTable, InMemDicomObject};
use dicom_dictionary_std::tags;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::attributes::{Attribute, AttributeKey, AttributeSet, AttributeValue};
use crate::error::{Result, ToolError};

/// Transfer syntax written into new templates (explicit VR little endian).
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

/// Serialisation format, chosen from the file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Yaml,
    Json,
}

impl StoreFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(StoreFormat::Yaml),
            Some("json") => Ok(StoreFormat::Json),
            _ => Err(ToolError::HeaderStore(format!(
                "unsupported header store suffix for {path:?} (expected .yaml, .yml or .json)"
            ))),
        }
    }
}

/// A header store: dataset attributes plus file meta attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderStore {
    pub info: Option<String>,
    pub file_meta: AttributeSet,
    pub data: AttributeSet,
}

impl HeaderStore {
    pub fn new(file_meta: AttributeSet, data: AttributeSet) -> Self {
        HeaderStore {
            info: None,
            file_meta,
            data,
        }
    }

    /// Sample store used by `attribute-template`.
    pub fn template() -> Self {
        let mut data = AttributeSet::new();
        data.insert(Attribute::new(
            AttributeKey::new(tags::MODALITY),
            VR::CS,
            AttributeValue::Text("MR".to_string()),
        ));
        let mut file_meta = AttributeSet::new();
        file_meta.insert(Attribute::new(
            AttributeKey::new(tags::TRANSFER_SYNTAX_UID),
            VR::UI,
            AttributeValue::Text(EXPLICIT_VR_LITTLE_ENDIAN.to_string()),
        ));
        HeaderStore {
            info: Some(
                "Attributes applied to every written slice. Keys are DICOM keywords or tags \
                 such as (0008,0060); vr is optional; binary values are hex encoded."
                    .to_string(),
            ),
            file_meta,
            data,
        }
    }

    /// Capture the dataset and file meta group of a DICOM file.
    pub fn from_dicom(meta: &FileMetaTable, obj: &InMemDicomObject) -> Self {
        HeaderStore::new(file_meta_attributes(meta), AttributeSet::from_dicom(obj))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let format = StoreFormat::from_path(path)?;
        let text = std::fs::read_to_string(path)?;
        Self::from_str_with(&text, format)
    }

    /// Write atomically; an existing file is only replaced when `force` is set.
    pub fn write(&self, path: &Path, force: bool) -> Result<()> {
        let format = StoreFormat::from_path(path)?;
        crate::config::ensure_writable(path, force)?;
        let text = self.to_string_with(format)?;

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(text.as_bytes())?;
        tmp.persist(path).map_err(|e| ToolError::Io(e.error))?;
        tracing::debug!("Header store written to {:?}", path);
        Ok(())
    }

    pub fn from_str_with(text: &str, format: StoreFormat) -> Result<Self> {
        let doc: StoreDocument = match format {
            StoreFormat::Yaml => {
                serde_yaml::from_str(text).map_err(|e| ToolError::HeaderStore(e.to_string()))?
            }
            StoreFormat::Json => {
                serde_json::from_str(text).map_err(|e| ToolError::HeaderStore(e.to_string()))?
            }
        };
        Ok(HeaderStore {
            info: doc.info,
            file_meta: attributes_from_entries(doc.file_meta.0)?,
            data: attributes_from_entries(doc.data.0)?,
        })
    }

    pub fn to_string_with(&self, format: StoreFormat) -> Result<String> {
        let doc = StoreDocument {
            info: self.info.clone(),
            file_meta: OrderedElements(entries_from_attributes(&self.file_meta)),
            data: OrderedElements(entries_from_attributes(&self.data)),
        };
        match format {
            StoreFormat::Yaml => {
                serde_yaml::to_string(&doc).map_err(|e| ToolError::HeaderStore(e.to_string()))
            }
            StoreFormat::Json => serde_json::to_string_pretty(&doc)
                .map_err(|e| ToolError::HeaderStore(e.to_string())),
        }
    }
}

/// File meta group elements worth carrying into a header store.
pub fn file_meta_attributes(meta: &FileMetaTable) -> AttributeSet {
    let mut set = AttributeSet::new();
    let mut put = |tag, value: &str| {
        let value = value.trim_end_matches(['\0', ' ']);
        if !value.is_empty() {
            set.insert(Attribute::new(
                AttributeKey::new(tag),
                VR::UI,
                AttributeValue::Text(value.to_string()),
            ));
        }
    };
    put(tags::MEDIA_STORAGE_SOP_CLASS_UID, meta.media_storage_sop_class_uid());
    put(tags::TRANSFER_SYNTAX_UID, meta.transfer_syntax());
    put(tags::IMPLEMENTATION_CLASS_UID, meta.implementation_class_uid());
    if let Some(name) = meta.implementation_version_name.as_deref() {
        let name = name.trim_end_matches(['\0', ' ']);
        if !name.is_empty() {
            set.insert(Attribute::new(
                AttributeKey::new(tags::IMPLEMENTATION_VERSION_NAME),
                VR::SH,
                AttributeValue::Text(name.to_string()),
            ));
        }
    }
    set
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    info: Option<String>,
    #[serde(default)]
    file_meta: OrderedElements,
    #[serde(default)]
    data: OrderedElements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<StoredValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    binary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredValue {
    List(Vec<StoredScalar>),
    Scalar(StoredScalar),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredScalar {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Map of elements that keeps document order in both YAML and JSON.
#[derive(Debug, Default)]
struct OrderedElements(Vec<(String, StoredElement)>);

impl Serialize for OrderedElements {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, element) in &self.0 {
            map.serialize_entry(key, element)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for OrderedElements {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ElementsVisitor;

        impl<'de> Visitor<'de> for ElementsVisitor {
            type Value = OrderedElements;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of attribute keys to elements")
            }

            fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(OrderedElements::default())
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, element)) = access.next_entry::<String, StoredElement>()? {
                    entries.push((key, element));
                }
                Ok(OrderedElements(entries))
            }
        }

        deserializer.deserialize_any(ElementsVisitor)
    }
}

fn vr_name(vr: VR) -> String {
    String::from(vr.to_string())
}

fn entries_from_attributes(set: &AttributeSet) -> Vec<(String, StoredElement)> {
    set.iter()
        .map(|attribute| {
            let (value, binary) = match &attribute.value {
                AttributeValue::Empty => (None, None),
                AttributeValue::Binary(bytes) => (None, Some(hex::encode(bytes))),
                AttributeValue::Text(s) => (Some(StoredValue::Scalar(StoredScalar::Text(s.clone()))), None),
                AttributeValue::Texts(v) => (
                    Some(StoredValue::List(v.iter().cloned().map(StoredScalar::Text).collect())),
                    None,
                ),
                AttributeValue::Int(i) => (Some(StoredValue::Scalar(StoredScalar::Int(*i))), None),
                AttributeValue::Ints(v) => (
                    Some(StoredValue::List(v.iter().copied().map(StoredScalar::Int).collect())),
                    None,
                ),
                AttributeValue::Float(f) => {
                    (Some(StoredValue::Scalar(StoredScalar::Float(*f))), None)
                }
                AttributeValue::Floats(v) => (
                    Some(StoredValue::List(v.iter().copied().map(StoredScalar::Float).collect())),
                    None,
                ),
            };
            let element = StoredElement {
                tag: Some(attribute.key.hex()),
                vr: Some(vr_name(attribute.vr)),
                value,
                binary,
            };
            (attribute.key.label(), element)
        })
        .collect()
}

fn scalar_value(scalar: StoredScalar) -> AttributeValue {
    match scalar {
        StoredScalar::Int(i) => AttributeValue::Int(i),
        StoredScalar::Float(f) => AttributeValue::Float(f),
        StoredScalar::Text(s) => AttributeValue::Text(s),
    }
}

fn list_value(items: Vec<StoredScalar>) -> AttributeValue {
    if items.iter().all(|s| matches!(s, StoredScalar::Int(_))) {
        let ints = items
            .into_iter()
            .filter_map(|s| match s {
                StoredScalar::Int(i) => Some(i),
                _ => None,
            })
            .collect();
        return AttributeValue::from_ints(ints);
    }
    if items.iter().all(|s| !matches!(s, StoredScalar::Text(_))) {
        let floats = items
            .into_iter()
            .filter_map(|s| match s {
                StoredScalar::Int(i) => Some(i as f64),
                StoredScalar::Float(f) => Some(f),
                StoredScalar::Text(_) => None,
            })
            .collect();
        return AttributeValue::from_floats(floats);
    }
    let texts = items
        .into_iter()
        .map(|s| match s {
            StoredScalar::Int(i) => i.to_string(),
            StoredScalar::Float(f) => f.to_string(),
            StoredScalar::Text(t) => t,
        })
        .collect();
    AttributeValue::from_texts(texts)
}

fn attribute_from_entry(name: &str, element: StoredElement) -> Result<Attribute> {
    let key = AttributeKey::parse(name)?;
    if let Some(tag_text) = element.tag.as_deref() {
        let tagged = AttributeKey::parse(tag_text)?;
        if tagged != key {
            return Err(ToolError::ConflictingAttribute {
                key: name.to_string(),
                first: key.hex(),
                second: tagged.hex(),
            });
        }
    }

    let vr = match element.vr.as_deref() {
        Some(text) => text.trim().parse::<VR>().map_err(|_| {
            ToolError::HeaderStore(format!("invalid VR {text:?} for attribute {name}"))
        })?,
        None => key.default_vr(),
    };

    let value = match (element.binary, element.value) {
        (Some(_), Some(_)) => {
            return Err(ToolError::InvalidAttributeValue {
                key: name.to_string(),
                reason: "both value and binary given".to_string(),
            })
        }
        (Some(hex_text), None) => AttributeValue::Binary(hex::decode(hex_text.trim()).map_err(
            |e| ToolError::InvalidAttributeValue {
                key: name.to_string(),
                reason: format!("binary is not hex: {e}"),
            },
        )?),
        (None, Some(StoredValue::Scalar(s))) => scalar_value(s),
        (None, Some(StoredValue::List(items))) => list_value(items),
        (None, None) => AttributeValue::Empty,
    };
    let value = value
        .normalize_for(vr)
        .map_err(|reason| ToolError::InvalidAttributeValue {
            key: name.to_string(),
            reason,
        })?;

    Ok(Attribute::new(key, vr, value))
}

fn attributes_from_entries(entries: Vec<(String, StoredElement)>) -> Result<AttributeSet> {
    let mut set = AttributeSet::new();
    for (name, element) in entries {
        let attribute = attribute_from_entry(&name, element)?;
        if let Some(existing) = set.get(attribute.key) {
            if existing.value != attribute.value {
                return Err(ToolError::ConflictingAttribute {
                    key: attribute.key.label(),
                    first: existing.value.to_string(),
                    second: attribute.value.to_string(),
                });
            }
        }
        set.insert(attribute);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> HeaderStore {
        let mut data = AttributeSet::new();
        data.insert_raw("PatientName", "Doe^Jane").unwrap();
        data.insert_raw("Modality", "CT").unwrap();
        data.insert_raw("PixelSpacing", "0.5\\0.5").unwrap();
        data.insert_raw("ImageType", "ORIGINAL\\PRIMARY").unwrap();
        data.insert_raw("Rows", "4").unwrap();
        data.insert(Attribute::new(
            AttributeKey::parse("0x00091001").unwrap(),
            VR::OB,
            AttributeValue::Binary(vec![0x0a, 0x0b]),
        ));
        let mut file_meta = AttributeSet::new();
        file_meta
            .insert_raw("TransferSyntaxUID", EXPLICIT_VR_LITTLE_ENDIAN)
            .unwrap();
        HeaderStore::new(file_meta, data)
    }

    #[test]
    fn yaml_and_json_round_trip() {
        let store = sample_store();
        for format in [StoreFormat::Yaml, StoreFormat::Json] {
            let text = store.to_string_with(format).unwrap();
            let back = HeaderStore::from_str_with(&text, format).unwrap();
            assert_eq!(back, store, "{format:?}:\n{text}");
        }
    }

    #[test]
    fn order_is_preserved() {
        let text = sample_store().to_string_with(StoreFormat::Json).unwrap();
        let patient = text.find("PatientName").unwrap();
        let modality = text.find("\"Modality\"").unwrap();
        let rows = text.find("\"Rows\"").unwrap();
        assert!(patient < modality && modality < rows);
    }

    #[test]
    fn keys_may_be_tag_notations_without_vr() {
        let yaml = "data:\n  (0008,0060): {value: MR}\n  '0x00280010': {value: 2}\n";
        let store = HeaderStore::from_str_with(yaml, StoreFormat::Yaml).unwrap();
        assert_eq!(store.data.text(tags::MODALITY).as_deref(), Some("MR"));
        let rows = store.data.get_tag(tags::ROWS).unwrap();
        assert_eq!(rows.vr, VR::US);
        assert_eq!(rows.value, AttributeValue::Int(2));
    }

    #[test]
    fn mismatching_key_and_tag_conflict() {
        let yaml = "data:\n  Modality: {tag: '0x00100010', value: MR}\n";
        let err = HeaderStore::from_str_with(yaml, StoreFormat::Yaml).unwrap_err();
        assert!(matches!(err, ToolError::ConflictingAttribute { .. }), "{err}");
    }

    #[test]
    fn two_spellings_with_different_values_conflict() {
        let yaml = "data:\n  Modality: {value: MR}\n  (0008,0060): {value: CT}\n";
        let err = HeaderStore::from_str_with(yaml, StoreFormat::Yaml).unwrap_err();
        assert!(matches!(err, ToolError::ConflictingAttribute { .. }));

        let yaml = "data:\n  Modality: {value: MR}\n  (0008,0060): {value: MR}\n";
        let store = HeaderStore::from_str_with(yaml, StoreFormat::Yaml).unwrap();
        assert_eq!(store.data.len(), 1);
    }

    #[test]
    fn unknown_suffix_is_rejected() {
        assert!(StoreFormat::from_path(Path::new("headers.txt")).is_err());
        assert_eq!(
            StoreFormat::from_path(Path::new("h.YML")).unwrap(),
            StoreFormat::Yaml
        );
    }

    #[test]
    fn write_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.yaml");
        HeaderStore::template().write(&path, false).unwrap();
        assert!(matches!(
            HeaderStore::template().write(&path, false),
            Err(ToolError::OutputExists(_))
        ));
        HeaderStore::template().write(&path, true).unwrap();

        let back = HeaderStore::read(&path).unwrap();
        assert_eq!(back.data.text(tags::MODALITY).as_deref(), Some("MR"));
        assert_eq!(
            back.file_meta.text(tags::TRANSFER_SYNTAX_UID).as_deref(),
            Some(EXPLICIT_VR_LITTLE_ENDIAN)
        );
    }
}
