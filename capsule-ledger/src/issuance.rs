//! Issuance registry
//!
//! Tracks each capsule's price, supply, units sold and lifecycle status.
//! A capsule has at most one active issuance; once it sells out (or is
//! withdrawn) the capsule may be issued again and the index moves to the new
//! issuance, while the old one stays stored for the market totals.

use crate::{
    types::{CapsuleId, Issuance, IssuanceStatus, UserId},
    unit::UnitOfWork,
    Error, Result, Storage,
};
use chrono::Utc;
use rocksdb::Snapshot;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Issuance registry
#[derive(Debug, Clone)]
pub struct IssuanceRegistry {
    storage: Arc<Storage>,
}

/// Registry totals from one snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySummary {
    /// Issuances with status active
    pub active_listings: u64,
    /// Units sold across every issuance ever created
    pub total_sold: u64,
}

impl IssuanceRegistry {
    /// Create registry over shared storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Latest committed issuance for a capsule
    pub fn get(&self, capsule_id: &CapsuleId) -> Result<Option<Issuance>> {
        self.storage.get_capsule_issuance(capsule_id)
    }

    /// List a capsule for sale
    pub fn create(
        &self,
        unit: &mut UnitOfWork<'_>,
        capsule_id: &CapsuleId,
        issuer: &UserId,
        unit_price: Decimal,
        total_supply: u64,
    ) -> Result<Issuance> {
        if unit_price <= Decimal::ZERO {
            return Err(Error::InvalidArgument(format!(
                "unit_price must be positive, got {}",
                unit_price
            )));
        }
        if total_supply == 0 {
            return Err(Error::InvalidArgument(
                "total_supply must be positive".to_string(),
            ));
        }

        if let Some(existing) = unit.issuance(capsule_id)? {
            if existing.is_active() {
                return Err(Error::DuplicateIssuance(capsule_id.to_string()));
            }
            tracing::debug!(
                capsule_id = %capsule_id,
                previous = %existing.id,
                status = existing.status.as_str(),
                "re-issuing capsule"
            );
        }

        let now = Utc::now();
        let issuance = Issuance {
            id: Uuid::now_v7(),
            capsule_id: capsule_id.clone(),
            issuer: issuer.clone(),
            unit_price,
            total_supply,
            sold_count: 0,
            status: IssuanceStatus::Active,
            created_at: now,
            updated_at: now,
        };
        unit.put_issuance(issuance.clone())?;
        Ok(issuance)
    }

    /// Take `count` units from the capsule's active issuance
    pub fn reserve_units(
        &self,
        unit: &mut UnitOfWork<'_>,
        capsule_id: &CapsuleId,
        count: u64,
    ) -> Result<Issuance> {
        if count == 0 {
            return Err(Error::InvalidArgument(
                "unit count must be at least 1".to_string(),
            ));
        }

        let mut issuance = unit
            .issuance(capsule_id)?
            .ok_or_else(|| Error::IssuanceNotFound(capsule_id.to_string()))?;

        match issuance.status {
            IssuanceStatus::Active => {}
            IssuanceStatus::SoldOut => {
                return Err(Error::IssuanceSoldOut {
                    capsule_id: capsule_id.to_string(),
                    requested: count,
                    remaining: 0,
                })
            }
            IssuanceStatus::Withdrawn => {
                return Err(Error::IssuanceNotFound(capsule_id.to_string()))
            }
        }

        let remaining = issuance.remaining();
        if count > remaining {
            return Err(Error::IssuanceSoldOut {
                capsule_id: capsule_id.to_string(),
                requested: count,
                remaining,
            });
        }

        issuance.sold_count += count;
        if issuance.sold_count == issuance.total_supply {
            issuance.status = IssuanceStatus::SoldOut;
        }
        issuance.updated_at = Utc::now();

        unit.put_issuance(issuance.clone())?;
        Ok(issuance)
    }

    /// Active listings and units sold as of `snapshot`
    pub fn summary(&self, snapshot: &Snapshot<'_>) -> Result<RegistrySummary> {
        let mut summary = RegistrySummary::default();
        for issuance in self.storage.scan_issuances(snapshot)? {
            if issuance.is_active() {
                summary.active_listings += 1;
            }
            summary.total_sold += issuance.sold_count;
        }
        Ok(summary)
    }
}
