//! Customer profile and extraction from upstream payloads

use crate::phone::{normalize_phone, normalize_phones};
use crate::value_bag::ValueBag;
use serde::{Deserialize, Serialize};

/// Contact and demographic profile of a unified customer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomerProfile {
    pub name: String,
    /// Normalized phone numbers
    pub phone_numbers: Vec<String>,
    pub emails: Vec<String>,
    pub birthday: String,
    pub gender: String,
    pub lives_in: String,
    pub addresses: Vec<String>,
    pub referral_code: String,
}

impl CustomerProfile {
    /// Fill empty fields from `other`; fields already set are never overwritten
    ///
    /// Phone numbers and emails are unioned since they carry no conflict: the
    /// receiver's entries keep their position and new ones are appended.
    pub fn fill_gaps_from(&mut self, other: &CustomerProfile) {
        fill_text(&mut self.name, &other.name);
        fill_text(&mut self.birthday, &other.birthday);
        fill_text(&mut self.gender, &other.gender);
        fill_text(&mut self.lives_in, &other.lives_in);
        fill_text(&mut self.referral_code, &other.referral_code);
        union_into(&mut self.phone_numbers, &other.phone_numbers);
        union_into(&mut self.emails, &other.emails);
        if self.addresses.is_empty() {
            self.addresses = other.addresses.clone();
        }
    }

    /// Extract whatever customer data a payload carries
    ///
    /// Candidate objects are read in order: `customer`, `customers[0]`,
    /// `page_customer`, then the payload root. The first non-empty value wins
    /// for every field.
    pub fn extract(payload: ValueBag<'_>) -> Self {
        let mut candidates = vec![payload.child("customer")];
        if let Some(first) = payload.children("customers").next() {
            candidates.push(first);
        }
        candidates.push(payload.child("page_customer"));
        candidates.push(payload);

        let mut profile = CustomerProfile::default();
        for bag in candidates.into_iter().filter(|b| !b.is_empty()) {
            profile.fill_gaps_from(&Self::from_object(bag));
        }
        profile
    }

    /// Read profile fields directly off one object
    pub fn from_object(bag: ValueBag<'_>) -> Self {
        let name = bag
            .first_text(&["name", "full_name", "customer_name", "bill_full_name"])
            .or_else(|| {
                let joined = [bag.text("first_name"), bag.text("last_name")]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                (!joined.is_empty()).then_some(joined)
            })
            .unwrap_or_default();

        let mut phones = bag.strings("phone_numbers");
        for key in ["phone", "phone_number", "bill_phone_number"] {
            phones.extend(bag.strings(key));
        }
        // Verified numbers picked up by the messaging system
        for recent in bag.children("recent_phone_numbers") {
            if matches!(recent.integer("status"), Some(2) | Some(3)) {
                phones.extend(recent.first_text(&["phone_number", "captured"]));
            }
        }

        let mut emails = bag.strings("emails");
        emails.extend(bag.strings("email"));
        emails.extend(bag.strings("bill_email"));
        let mut dedup_emails: Vec<String> = Vec::new();
        for e in emails {
            let e = e.to_lowercase();
            if !dedup_emails.contains(&e) {
                dedup_emails.push(e);
            }
        }

        CustomerProfile {
            name,
            phone_numbers: normalize_phones(phones),
            emails: dedup_emails,
            birthday: bag
                .first_text(&["birthday", "date_of_birth"])
                .unwrap_or_default(),
            gender: bag.text("gender").unwrap_or_default(),
            lives_in: bag.text("lives_in").unwrap_or_default(),
            addresses: extract_addresses(bag),
            referral_code: bag.text("referral_code").unwrap_or_default(),
        }
    }

    /// True when the normalized number is one of this profile's phones
    pub fn has_phone(&self, raw: &str) -> bool {
        let n = normalize_phone(raw);
        !n.is_empty() && self.phone_numbers.contains(&n)
    }
}

fn fill_text(target: &mut String, candidate: &str) {
    if target.trim().is_empty() && !candidate.trim().is_empty() {
        *target = candidate.to_string();
    }
}

fn union_into(target: &mut Vec<String>, extra: &[String]) {
    for item in extra {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

fn extract_addresses(bag: ValueBag<'_>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |addr: Option<String>| {
        if let Some(a) = addr {
            if !out.contains(&a) {
                out.push(a);
            }
        }
    };
    for key in ["addresses", "shop_customer_addresses"] {
        for entry in bag.list(key) {
            match entry.as_str() {
                Some(s) => push(Some(s.trim().to_string()).filter(|s| !s.is_empty())),
                None => push(address_line(ValueBag::new(entry))),
            }
        }
    }
    for key in ["shop_customer_address", "shipping_address"] {
        push(address_line(bag.child(key)));
    }
    for key in ["full_address", "address"] {
        push(bag.text(key));
    }
    out
}

/// Single-line rendering of a structured address object
fn address_line(addr: ValueBag<'_>) -> Option<String> {
    if addr.is_empty() {
        return None;
    }
    if let Some(full) = addr.text("full_address") {
        return Some(full);
    }
    let parts: Vec<String> = [
        "address",
        "commune_name",
        "district_name",
        "province_name",
    ]
    .iter()
    .filter_map(|k| addr.text(k))
    .collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fill_gaps_keeps_primary_values() {
        let mut primary = CustomerProfile {
            name: "Lan".into(),
            phone_numbers: vec!["84912345678".into()],
            ..Default::default()
        };
        let secondary = CustomerProfile {
            name: "Lan Nguyen".into(),
            gender: "female".into(),
            phone_numbers: vec!["84912345678".into(), "84987654321".into()],
            addresses: vec!["1 Le Loi".into()],
            ..Default::default()
        };
        primary.fill_gaps_from(&secondary);
        assert_eq!(primary.name, "Lan");
        assert_eq!(primary.gender, "female");
        assert_eq!(primary.phone_numbers.len(), 2);
        assert_eq!(primary.addresses, vec!["1 Le Loi".to_string()]);
    }

    #[test]
    fn test_extract_prefers_nested_customer() {
        let payload = json!({
            "name": "Root Name",
            "customer": {"name": "Nested", "phone_numbers": ["0912 345 678"]},
            "customers": [{"gender": "male", "emails": ["A@B.com"]}],
            "page_customer": {"lives_in": "Hanoi"}
        });
        let p = CustomerProfile::extract(ValueBag::new(&payload));
        assert_eq!(p.name, "Nested");
        assert_eq!(p.phone_numbers, vec!["84912345678".to_string()]);
        assert_eq!(p.gender, "male");
        assert_eq!(p.emails, vec!["a@b.com".to_string()]);
        assert_eq!(p.lives_in, "Hanoi");
    }

    #[test]
    fn test_first_and_last_name_joined() {
        let payload = json!({"first_name": "Minh", "last_name": "Tran"});
        assert_eq!(CustomerProfile::from_object(ValueBag::new(&payload)).name, "Minh Tran");
    }

    #[test]
    fn test_recent_phone_numbers_need_verified_status() {
        let payload = json!({"recent_phone_numbers": [
            {"phone_number": "0911111111", "status": 1},
            {"phone_number": "0922222222", "status": 2},
            {"phone_number": "0933333333", "status": 3}
        ]});
        let p = CustomerProfile::from_object(ValueBag::new(&payload));
        assert_eq!(p.phone_numbers, vec!["84922222222".to_string(), "84933333333".to_string()]);
    }

    #[test]
    fn test_order_bill_fields_and_shipping_address() {
        let order = json!({
            "bill_full_name": "Hoa",
            "bill_phone_number": "0909000111",
            "bill_email": "hoa@example.com",
            "shipping_address": {"address": "12 Hang Bai", "province_name": "Ha Noi"}
        });
        let p = CustomerProfile::from_object(ValueBag::new(&order));
        assert_eq!(p.name, "Hoa");
        assert!(p.has_phone("+84 909 000 111"));
        assert_eq!(p.addresses, vec!["12 Hang Bai, Ha Noi".to_string()]);
    }
}
