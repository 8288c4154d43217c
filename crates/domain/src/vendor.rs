//! Vendor aggregate: a business offering pet services.

use std::time::Instant;

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use store::TransactionalStore;
use thiserror::Error;

use crate::aggregate::{Aggregate, AggregateRoot, DomainEvent};
use crate::command::{CommandOutcome, CommandPipeline};
use crate::context::CommandContext;
use crate::error::DomainError;
use crate::unit_of_work::UnitOfWork;
use crate::value_objects::BankAccount;

/// Errors that can occur during vendor operations.
#[derive(Debug, Error)]
pub enum VendorError {
    /// Vendor name is required.
    #[error("Vendor name is required")]
    NameRequired,

    /// Bank account has empty fields.
    #[error("Bank account is incomplete")]
    IncompleteBankAccount,

    /// Vendor is already registered.
    #[error("Vendor already registered")]
    AlreadyRegistered,

    /// Operation on a vendor that was never registered.
    #[error("Vendor is not registered")]
    NotRegistered,
}

/// Events that can occur on a vendor aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum VendorEvent {
    VendorRegistered(VendorRegisteredData),
    VendorBankAccountUpdated(VendorBankAccountUpdatedData),
}

impl DomainEvent for VendorEvent {
    fn event_type(&self) -> &'static str {
        match self {
            VendorEvent::VendorRegistered(_) => "VendorRegistered",
            VendorEvent::VendorBankAccountUpdated(_) => "VendorBankAccountUpdated",
        }
    }
}

/// Data for VendorRegistered event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorRegisteredData {
    pub vendor_id: AggregateId,
    pub owner_id: AggregateId,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Data for VendorBankAccountUpdated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorBankAccountUpdatedData {
    pub bank_account: BankAccount,
    pub updated_at: DateTime<Utc>,
}

/// Vendor aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vendor {
    id: Option<AggregateId>,
    owner_id: Option<AggregateId>,
    name: String,
    phone: Option<String>,
    address: Option<String>,
    bank_account: Option<BankAccount>,
}

impl Aggregate for Vendor {
    type Event = VendorEvent;
    type Error = VendorError;

    fn aggregate_type() -> &'static str {
        "Vendor"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            VendorEvent::VendorRegistered(data) => {
                self.id = Some(data.vendor_id);
                self.owner_id = Some(data.owner_id);
                self.name = data.name;
                self.phone = data.phone;
                self.address = data.address;
            }
            VendorEvent::VendorBankAccountUpdated(data) => {
                self.bank_account = Some(data.bank_account);
            }
        }
    }
}

impl Vendor {
    pub fn owner_id(&self) -> Option<AggregateId> {
        self.owner_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Returns the bank account payouts are sent to, if one is configured.
    pub fn bank_account(&self) -> Option<&BankAccount> {
        self.bank_account.as_ref().filter(|account| account.is_complete())
    }

    /// Registers a vendor owned by a user.
    pub fn register(
        &self,
        vendor_id: AggregateId,
        owner_id: AggregateId,
        cmd: &RegisterVendor,
    ) -> Result<Vec<VendorEvent>, VendorError> {
        if self.id.is_some() {
            return Err(VendorError::AlreadyRegistered);
        }
        cmd.validate()?;

        let mut events = vec![VendorEvent::VendorRegistered(VendorRegisteredData {
            vendor_id,
            owner_id,
            name: cmd.name.trim().to_string(),
            phone: cmd.phone.clone(),
            address: cmd.address.clone(),
            registered_at: Utc::now(),
        })];
        if let Some(account) = &cmd.bank_account {
            events.push(Self::bank_account_updated(account.clone()));
        }
        Ok(events)
    }

    /// Sets or replaces the payout bank account.
    pub fn update_bank_account(
        &self,
        bank_account: BankAccount,
    ) -> Result<Vec<VendorEvent>, VendorError> {
        if self.id.is_none() {
            return Err(VendorError::NotRegistered);
        }
        if !bank_account.is_complete() {
            return Err(VendorError::IncompleteBankAccount);
        }
        if self.bank_account.as_ref() == Some(&bank_account) {
            return Ok(vec![]);
        }
        Ok(vec![Self::bank_account_updated(bank_account)])
    }

    fn bank_account_updated(bank_account: BankAccount) -> VendorEvent {
        VendorEvent::VendorBankAccountUpdated(VendorBankAccountUpdatedData {
            bank_account,
            updated_at: Utc::now(),
        })
    }
}

/// Command to register a vendor.
#[derive(Debug, Clone)]
pub struct RegisterVendor {
    pub owner_id: AggregateId,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub bank_account: Option<BankAccount>,
}

impl RegisterVendor {
    pub fn validate(&self) -> Result<(), VendorError> {
        if self.name.trim().is_empty() {
            return Err(VendorError::NameRequired);
        }
        if self
            .bank_account
            .as_ref()
            .is_some_and(|account| !account.is_complete())
        {
            return Err(VendorError::IncompleteBankAccount);
        }
        Ok(())
    }
}

/// Service for managing vendors.
pub struct VendorService<S: TransactionalStore> {
    pipeline: CommandPipeline<S>,
}

impl<S: TransactionalStore> VendorService<S> {
    pub fn new(pipeline: CommandPipeline<S>) -> Self {
        Self { pipeline }
    }

    /// Registers a vendor. The owner must be a registered user.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn register_vendor(
        &self,
        ctx: &CommandContext,
        cmd: RegisterVendor,
    ) -> Result<Vendor, DomainError> {
        const COMMAND: &str = "register_vendor";
        let started = Instant::now();
        if let Err(e) = cmd.validate() {
            return self.pipeline.reject(COMMAND, e.into());
        }

        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = register(&mut uow, &cmd).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    /// Sets or replaces a vendor's payout bank account.
    #[tracing::instrument(skip(self, ctx, bank_account), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn update_bank_account(
        &self,
        ctx: &CommandContext,
        vendor_id: AggregateId,
        bank_account: BankAccount,
    ) -> Result<Vendor, DomainError> {
        const COMMAND: &str = "update_bank_account";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = update_bank_account(&mut uow, vendor_id, bank_account).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }
}

async fn register<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    cmd: &RegisterVendor,
) -> Result<CommandOutcome<Vendor>, DomainError> {
    uow.users()?.get_by_id(cmd.owner_id).await?;

    let mut root = AggregateRoot::<Vendor>::new();
    root.execute(|v| v.register(AggregateId::new(), cmd.owner_id, cmd))?;
    let events = uow.vendors()?.save(&mut root).await?;
    Ok(CommandOutcome::with_events(root.into_state(), events))
}

async fn update_bank_account<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    vendor_id: AggregateId,
    bank_account: BankAccount,
) -> Result<CommandOutcome<Vendor>, DomainError> {
    let mut vendors = uow.vendors()?;
    let mut root = vendors.get_by_id(vendor_id).await?;
    root.execute(|v| v.update_bank_account(bank_account))?;
    let events = vendors.save(&mut root).await?;
    Ok(CommandOutcome::with_events(root.into_state(), events))
}
