//! Vendor-tag dispatch tables.

use crate::error::{InfraError, InfraResult};

/// A family's dispatch table: supported tags with their constructors, plus
/// tags that are recognised but have no implementation yet.
pub(crate) struct VendorRegistry<T: 'static> {
    pub family: &'static str,
    pub supported: &'static [(&'static str, T)],
    pub placeholders: &'static [&'static str],
}

impl<T: Copy + 'static> VendorRegistry<T> {
    pub fn lookup(&self, vendor: &str) -> InfraResult<T> {
        if let Some((_, constructor)) = self.supported.iter().find(|(tag, _)| *tag == vendor) {
            return Ok(*constructor);
        }

        let reason = if self.placeholders.contains(&vendor) {
            "not implemented".to_string()
        } else {
            format!("expected one of: {}", self.tags().join(", "))
        };

        Err(InfraError::UnsupportedVendor {
            family: self.family,
            vendor: vendor.to_string(),
            reason,
        })
    }

    pub fn tags(&self) -> Vec<&'static str> {
        self.supported.iter().map(|(tag, _)| *tag).collect()
    }
}
