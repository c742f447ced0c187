//! Identity resolution and cross-source merge
//!
//! A POS customer and a messaging customer are the same person when the POS
//! record's `fb_id` names the messaging customer's page and psid, or failing
//! that when they share a normalized phone number. Once a POS link exists the
//! POS id is the canonical unified id, whichever side arrives first.

use super::CustomerService;
use crate::db::{customers, sources};
use crm_common::models::{
    CustomerProfile, MergeMethod, MessagingCustomerRecord, PosCustomerRecord, Source,
    UnifiedCustomer,
};
use crm_common::time::now_ms;
use crm_common::{Error, Result};
use tracing::{debug, info};

/// Counterpart record found in the other source, with the evidence used
struct Partner<R> {
    record: R,
    method: MergeMethod,
}

impl CustomerService {
    /// Map any native or unified id to the unified id it is filed under
    ///
    /// `None` means no customer holds the id yet and the caller should merge.
    pub async fn resolve_unified_id(&self, org_id: &str, source_id: &str) -> Result<Option<String>> {
        let found = self.find_customer(org_id, source_id).await?;
        Ok(found.map(|c| c.unified_id))
    }

    /// Best customer for `id`: fully linked first, then most recently updated
    pub(crate) async fn find_customer(&self, org_id: &str, id: &str) -> Result<Option<UnifiedCustomer>> {
        let id = require_id(id)?;
        let mut found = customers::find_by_any_id(&self.db, org_id, id).await?;
        Ok(if found.is_empty() { None } else { Some(found.swap_remove(0)) })
    }

    /// Upsert the unified customer for a POS customer record
    pub async fn merge_from_pos_customer(&self, record: &PosCustomerRecord) -> Result<UnifiedCustomer> {
        let org_id = record.org_id.as_str();
        let pos_profile = record.profile();
        let partner = self.messaging_partner(record, &pos_profile).await?;

        let existing = self.find_pos_owner(org_id, &record.id).await?;
        let is_new = existing.is_none();
        let mut customer = existing
            .unwrap_or_else(|| UnifiedCustomer::standalone(org_id, Source::Pos, &record.id, now_ms()));
        customer.source_ids.link(Source::Pos, &record.id);

        let mut profile = pos_profile;
        if let Some(p) = &partner {
            profile.fill_gaps_from(&p.record.profile());
            self.apply_link(&mut customer, Source::Messaging, &p.record.id, p.method);
        }
        profile.fill_gaps_from(&customer.profile);
        customer.profile = profile;
        if is_new {
            customer.primary_source = Source::Pos;
        }

        let (customer, _) = self.persist_merged(customer, Source::Pos.as_str(), &record.id).await?;
        Ok(customer)
    }

    /// Upsert the unified customer for a messaging customer record
    ///
    /// With a POS counterpart the record is folded into the POS-keyed customer;
    /// otherwise it stands alone under its own id.
    pub async fn merge_from_messaging_customer(
        &self,
        record: &MessagingCustomerRecord,
    ) -> Result<UnifiedCustomer> {
        let org_id = record.org_id.as_str();
        let messaging_profile = record.profile();
        let partner = self.pos_partner(record, &messaging_profile).await?;

        let customer = match partner {
            Some(p) => {
                let existing = self.find_pos_owner(org_id, &p.record.id).await?;
                let mut customer = existing.unwrap_or_else(|| {
                    UnifiedCustomer::standalone(org_id, Source::Pos, &p.record.id, now_ms())
                });
                customer.source_ids.link(Source::Pos, &p.record.id);
                self.apply_link(&mut customer, Source::Messaging, &record.id, p.method);

                let mut profile = p.record.profile();
                profile.fill_gaps_from(&messaging_profile);
                profile.fill_gaps_from(&customer.profile);
                customer.profile = profile;
                customer
            }
            None => {
                let existing = match customers::find_by_source_link(&self.db, org_id, Source::Messaging, &record.id).await? {
                    Some(c) => Some(c),
                    None => customers::load_customer(&self.db, org_id, &record.id).await?,
                };
                let mut customer = existing.unwrap_or_else(|| {
                    UnifiedCustomer::standalone(org_id, Source::Messaging, &record.id, now_ms())
                });
                customer.source_ids.link(Source::Messaging, &record.id);
                customer.profile = layer_profiles(&customer, messaging_profile);
                customer
            }
        };

        let (customer, _) = self
            .persist_merged(customer, Source::Messaging.as_str(), &record.id)
            .await?;
        Ok(customer)
    }

    /// Create a customer from whatever a touchpoint carries about it
    ///
    /// Used when an order or conversation names a customer no source record
    /// exists for yet.
    pub(crate) async fn upsert_minimal(
        &self,
        org_id: &str,
        source: Source,
        native_id: &str,
        profile: CustomerProfile,
    ) -> Result<UnifiedCustomer> {
        let native_id = require_id(native_id)?;
        let mut customer = UnifiedCustomer::standalone(org_id, source, native_id, now_ms());
        customer.merge_method = MergeMethod::CustomerId;
        customer.profile = profile;
        debug!(org_id, native_id, source = %source, "Creating customer from touchpoint data");

        let (customer, _) = self.persist_merged(customer, source.as_str(), native_id).await?;
        Ok(customer)
    }

    /// Unified customer owning a POS id, by link or by unified id
    async fn find_pos_owner(&self, org_id: &str, pos_id: &str) -> Result<Option<UnifiedCustomer>> {
        match customers::find_by_source_link(&self.db, org_id, Source::Pos, pos_id).await? {
            Some(c) => Ok(Some(c)),
            None => customers::load_customer(&self.db, org_id, pos_id).await,
        }
    }

    fn apply_link(&self, customer: &mut UnifiedCustomer, source: Source, id: &str, method: MergeMethod) {
        if customer.source_ids.link(source, id) {
            customer.merge_method = method;
            customer.merged_at = now_ms();
            info!(
                unified_id = %customer.unified_id,
                linked = id,
                method = %method,
                "Linked {} customer",
                source
            );
        } else if customer.source_ids.get(source) == Some(id) && customer.merge_method == MergeMethod::SingleSource {
            customer.merge_method = method;
        }
    }

    async fn messaging_partner(
        &self,
        record: &PosCustomerRecord,
        profile: &CustomerProfile,
    ) -> Result<Option<Partner<MessagingCustomerRecord>>> {
        let org_id = record.org_id.as_str();
        if let Some(link) = record.explicit_link() {
            if let Some(m) = sources::find_messaging_by_link(&self.db, org_id, &link).await? {
                if !self.claimed_elsewhere(org_id, Source::Messaging, &m.id, &record.id).await? {
                    return Ok(Some(Partner { record: m, method: MergeMethod::ExplicitLink }));
                }
            }
        }

        let ids = sources::find_ids_by_phones(&self.db, org_id, Source::Messaging, &profile.phone_numbers).await?;
        for id in ids {
            if self.claimed_elsewhere(org_id, Source::Messaging, &id, &record.id).await? {
                continue;
            }
            if let Some(m) = sources::load_messaging_customer(&self.db, org_id, &id).await? {
                return Ok(Some(Partner { record: m, method: MergeMethod::Phone }));
            }
        }
        Ok(None)
    }

    async fn pos_partner(
        &self,
        record: &MessagingCustomerRecord,
        profile: &CustomerProfile,
    ) -> Result<Option<Partner<PosCustomerRecord>>> {
        let org_id = record.org_id.as_str();
        if let Some(link) = record.explicit_link() {
            if let Some(p) = sources::find_pos_by_link(&self.db, org_id, &link).await? {
                if !self.claimed_elsewhere(org_id, Source::Pos, &p.id, &record.id).await? {
                    return Ok(Some(Partner { record: p, method: MergeMethod::ExplicitLink }));
                }
            }
        }

        let ids = sources::find_ids_by_phones(&self.db, org_id, Source::Pos, &profile.phone_numbers).await?;
        for id in ids {
            if self.claimed_elsewhere(org_id, Source::Pos, &id, &record.id).await? {
                continue;
            }
            if let Some(p) = sources::load_pos_customer(&self.db, org_id, &id).await? {
                return Ok(Some(Partner { record: p, method: MergeMethod::Phone }));
            }
        }
        Ok(None)
    }

    /// Whether the `candidate` record of `source` is already linked to a
    /// counterpart other than `claimant`
    async fn claimed_elsewhere(
        &self,
        org_id: &str,
        source: Source,
        candidate: &str,
        claimant: &str,
    ) -> Result<bool> {
        let other = match source {
            Source::Pos => Source::Messaging,
            Source::Messaging => Source::Pos,
        };
        let holders = customers::find_by_any_id(&self.db, org_id, candidate).await?;
        Ok(holders.iter().any(|c| {
            c.source_ids.get(source) == Some(candidate)
                && c.source_ids.get(other).is_some_and(|linked| linked != claimant)
        }))
    }
}

/// Current profile layered with a fresh source profile, primary source first
fn layer_profiles(customer: &UnifiedCustomer, incoming: CustomerProfile) -> CustomerProfile {
    if customer.primary_source == Source::Messaging {
        let mut profile = incoming;
        profile.fill_gaps_from(&customer.profile);
        profile
    } else {
        let mut profile = customer.profile.clone();
        profile.fill_gaps_from(&incoming);
        profile
    }
}

pub(crate) fn require_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(Error::InvalidInput("customer id must not be blank".into()));
    }
    Ok(id)
}
