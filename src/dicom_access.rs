//
// dicom_access.rs
// Dicom-Volume-Tools-rs
//
// Typed element lookups shared by the loader, the writer and the reporting commands.
//
// Thales Matheus Mendonça Santos - November 2025

use dicom::core::Tag;
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{DefaultDicomObject, InMemDicomObject};

/// Small helper trait to pull typed values from different DICOM object shapes.
pub trait ElementAccess {
    fn element_str(&self, tag: Tag) -> Option<String>;
    fn element_f64s(&self, tag: Tag) -> Option<Vec<f64>>;
    fn element_int(&self, tag: Tag) -> Option<i64>;
    fn has_element(&self, tag: Tag) -> bool;
    fn transfer_syntax(&self) -> Option<String>;

    fn element_f64(&self, tag: Tag) -> Option<f64> {
        self.element_f64s(tag).and_then(|v| v.first().copied())
    }
}

fn trimmed(text: &str) -> Option<String> {
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!text.is_empty()).then(|| text.to_string())
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .and_then(|s| trimmed(&s))
    }

    fn element_f64s(&self, tag: Tag) -> Option<Vec<f64>> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_multi_float64().ok())
            .filter(|v| !v.is_empty())
    }

    fn element_int(&self, tag: Tag) -> Option<i64> {
        self.element(tag).ok().and_then(|e| e.to_int::<i64>().ok())
    }

    fn has_element(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }

    fn transfer_syntax(&self) -> Option<String> {
        None
    }
}

// File objects dereference to their dataset; only the transfer syntax comes from the meta group.
impl ElementAccess for DefaultDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        (**self).element_str(tag)
    }

    fn element_f64s(&self, tag: Tag) -> Option<Vec<f64>> {
        (**self).element_f64s(tag)
    }

    fn element_int(&self, tag: Tag) -> Option<i64> {
        (**self).element_int(tag)
    }

    fn has_element(&self, tag: Tag) -> bool {
        (**self).has_element(tag)
    }

    fn transfer_syntax(&self) -> Option<String> {
        trimmed(self.meta().transfer_syntax())
    }
}
