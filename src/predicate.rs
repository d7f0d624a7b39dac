//! Filter → predicate translation.
//!
//! A [`Predicate`] is built once per search from a [`SearchFilter`] and can
//! be rendered two ways: as a parameterized SQL fragment for the analytical
//! store ([`Predicate::fragment`] / [`Predicate::params`]), or evaluated
//! directly against a [`ContactRecord`] ([`Predicate::matches`]) by the
//! in-memory store. Both renderings share the same clause list, so they
//! agree on which fields participate.
//!
//! # Matching rules
//!
//! | Field kind          | Query value                  | Compared against                   |
//! |---------------------|------------------------------|------------------------------------|
//! | text                | trimmed, lower-cased         | lower-cased column (`*_lc`)        |
//! | phone-like          | digits only                  | column with non-digits removed     |
//!
//! Every comparison is a substring match. A field whose query value reduces
//! to the empty string does not produce a clause.

use crate::filter::{Combinator, SearchFilter};
use crate::models::ContactRecord;

/// Filterable contact fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Email,
    Phone,
    Linkedin,
    Position,
    Company,
    CompanyPhone,
    Website,
    Domain,
    Facebook,
    LinkedinCompanyPage,
}

impl Field {
    fn is_phone(&self) -> bool {
        matches!(self, Field::Phone | Field::CompanyPhone)
    }

    /// Column expression the clause compares against.
    pub fn column_expr(&self) -> &'static str {
        match self {
            Field::Name => "name_lc",
            Field::Email => "email_lc",
            Field::Phone => "replaceRegexpAll(phone, '[^0-9]+', '')",
            Field::Linkedin => "linkedin_lc",
            Field::Position => "position_lc",
            Field::Company => "company_lc",
            Field::CompanyPhone => "replaceRegexpAll(company_phone, '[^0-9]+', '')",
            Field::Website => "website_lc",
            Field::Domain => "domain_lc",
            Field::Facebook => "facebook_lc",
            Field::LinkedinCompanyPage => "linkedin_company_page_lc",
        }
    }

    fn value<'a>(&self, record: &'a ContactRecord) -> &'a str {
        match self {
            Field::Name => &record.name,
            Field::Email => &record.email,
            Field::Phone => &record.phone,
            Field::Linkedin => &record.linkedin,
            Field::Position => &record.position,
            Field::Company => &record.company,
            Field::CompanyPhone => &record.company_phone,
            Field::Website => &record.website,
            Field::Domain => &record.domain,
            Field::Facebook => &record.facebook,
            Field::LinkedinCompanyPage => &record.linkedin_company_page,
        }
    }

    fn normalize(&self, raw: &str) -> String {
        if self.is_phone() {
            digits_only(raw)
        } else {
            raw.trim().to_lowercase()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    field: Field,
    needle: String,
}

/// A combinator plus the clauses for every populated filter field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    combinator: Combinator,
    clauses: Vec<Clause>,
}

impl Predicate {
    pub fn build(filter: &SearchFilter, combinator: Combinator) -> Self {
        let fields = [
            (Field::Name, &filter.name),
            (Field::Email, &filter.email),
            (Field::Phone, &filter.phone),
            (Field::Linkedin, &filter.linkedin),
            (Field::Position, &filter.position),
            (Field::Company, &filter.company),
            (Field::CompanyPhone, &filter.company_phone),
            (Field::Website, &filter.website),
            (Field::Domain, &filter.domain),
            (Field::Facebook, &filter.facebook),
            (Field::LinkedinCompanyPage, &filter.linkedin_company_page),
        ];

        let clauses = fields
            .into_iter()
            .filter_map(|(field, raw)| {
                let needle = field.normalize(raw);
                if needle.is_empty() {
                    None
                } else {
                    Some(Clause { field, needle })
                }
            })
            .collect();

        Self {
            combinator,
            clauses,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// SQL boolean expression with one `?` per clause. `1` when no field is
    /// populated.
    pub fn fragment(&self) -> String {
        if self.clauses.is_empty() {
            return "1".to_string();
        }
        let joiner = format!(" {} ", self.combinator.as_sql());
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|c| format!("{} LIKE ?", c.field.column_expr()))
            .collect();
        format!("({})", parts.join(&joiner))
    }

    /// Bind values for [`fragment`](Self::fragment), in placeholder order.
    pub fn params(&self) -> Vec<String> {
        self.clauses
            .iter()
            .map(|c| format!("%{}%", escape_like(&c.needle)))
            .collect()
    }

    /// In-memory evaluation with the same semantics as the SQL rendering.
    pub fn matches(&self, record: &ContactRecord) -> bool {
        if self.clauses.is_empty() {
            return true;
        }
        let hit = |c: &Clause| {
            let hay = c.field.value(record);
            if c.field.is_phone() {
                digits_only(hay).contains(&c.needle)
            } else {
                hay.to_lowercase().contains(&c.needle)
            }
        };
        match self.combinator {
            Combinator::And => self.clauses.iter().all(hit),
            Combinator::Or => self.clauses.iter().any(hit),
        }
    }
}

pub fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Escapes LIKE metacharacters so user input matches literally.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
