//! Search filter input and its derived normalized key.
//!
//! The normalized key is a deterministic string over the combinator, every
//! filter field (trimmed and lower-cased, in a fixed order with explicit
//! labels) and the clamped pagination. It is both the cache key for a
//! device's last search and the dedup key stored with each audit entry.

use serde::{Deserialize, Serialize};

/// How populated filter clauses are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Combinator {
    And,
    Or,
}

impl Combinator {
    /// `OR` in any case selects union; anything else is intersection.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("or") {
            Combinator::Or
        } else {
            Combinator::And
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
        }
    }
}

/// Structured search input as sent by clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFilter {
    pub logic: String,
    pub page: i64,
    pub page_size: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub linkedin: String,
    pub position: String,
    pub company: String,
    pub company_phone: String,
    pub website: String,
    pub domain: String,
    pub facebook: String,
    pub linkedin_company_page: String,
}

/// Clamped pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub size: u32,
}

impl Page {
    /// `page` below 1 becomes 1; a size outside `(0, max_size]` becomes
    /// `default_size`.
    pub fn clamp(page: i64, size: i64, default_size: u32, max_size: u32) -> Self {
        let page = if page < 1 {
            1
        } else {
            page.min(u32::MAX as i64) as u32
        };
        let size = if size <= 0 || size > max_size as i64 {
            default_size
        } else {
            size as u32
        };
        Page { page, size }
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.size as u64
    }
}

impl SearchFilter {
    pub fn combinator(&self) -> Combinator {
        Combinator::parse(&self.logic)
    }

    /// Labelled field values in the fixed key order.
    pub fn labelled_fields(&self) -> [(&'static str, &str); 11] {
        [
            ("name", self.name.as_str()),
            ("email", self.email.as_str()),
            ("phone", self.phone.as_str()),
            ("linkedin", self.linkedin.as_str()),
            ("position", self.position.as_str()),
            ("company", self.company.as_str()),
            ("companyPhone", self.company_phone.as_str()),
            ("website", self.website.as_str()),
            ("domain", self.domain.as_str()),
            ("facebook", self.facebook.as_str()),
            ("linkedinCompanyPage", self.linkedin_company_page.as_str()),
        ]
    }

    pub fn normalized_key(&self, page: Page) -> String {
        let mut key = format!("logic={}", self.combinator().as_sql());
        for (label, value) in self.labelled_fields() {
            key.push('|');
            key.push_str(label);
            key.push('=');
            key.push_str(&value.trim().to_lowercase());
        }
        key.push_str(&format!("|page={}|size={}", page.page, page.size));
        key
    }
}
