//! Pet aggregate.

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

/// Errors that can occur during pet operations.
#[derive(Debug, Error)]
pub enum PetError {
    /// Pet name is required.
    #[error("Pet name is required")]
    NameRequired,

    /// Species is required.
    #[error("Pet species is required")]
    SpeciesRequired,

    /// Pet is already registered.
    #[error("Pet already registered")]
    AlreadyRegistered,

    /// Operation on a pet that was never registered.
    #[error("Pet is not registered")]
    NotRegistered,
}

/// Events that can occur on a pet aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PetEvent {
    PetRegistered(PetRegisteredData),
    PetUpdated(PetUpdatedData),
}

impl DomainEvent for PetEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PetEvent::PetRegistered(_) => "PetRegistered",
            PetEvent::PetUpdated(_) => "PetUpdated",
        }
    }
}

/// Data for PetRegistered event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetRegisteredData {
    pub pet_id: AggregateId,
    pub owner_id: AggregateId,
    pub name: String,
    pub species: String,
    pub breed: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Data for PetUpdated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetUpdatedData {
    pub name: String,
    pub species: String,
    pub breed: Option<String>,
}

/// Pet aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pet {
    id: Option<AggregateId>,
    owner_id: Option<AggregateId>,
    name: String,
    species: String,
    breed: Option<String>,
}

impl Aggregate for Pet {
    type Event = PetEvent;
    type Error = PetError;

    fn aggregate_type() -> &'static str {
        "Pet"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            PetEvent::PetRegistered(data) => {
                self.id = Some(data.pet_id);
                self.owner_id = Some(data.owner_id);
                self.name = data.name;
                self.species = data.species;
                self.breed = data.breed;
            }
            PetEvent::PetUpdated(data) => {
                self.name = data.name;
                self.species = data.species;
                self.breed = data.breed;
            }
        }
    }
}

impl Pet {
    pub fn owner_id(&self) -> Option<AggregateId> {
        self.owner_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn species(&self) -> &str {
        &self.species
    }

    pub fn breed(&self) -> Option<&str> {
        self.breed.as_deref()
    }

    /// Registers a pet for an owner.
    pub fn register(
        &self,
        pet_id: AggregateId,
        owner_id: AggregateId,
        details: &PetDetails,
    ) -> Result<Vec<PetEvent>, PetError> {
        if self.id.is_some() {
            return Err(PetError::AlreadyRegistered);
        }
        details.validate()?;

        Ok(vec![PetEvent::PetRegistered(PetRegisteredData {
            pet_id,
            owner_id,
            name: details.name.trim().to_string(),
            species: details.species.trim().to_string(),
            breed: details.breed.clone(),
            registered_at: Utc::now(),
        })])
    }

    /// Replaces the pet's descriptive fields.
    pub fn update(&self, details: &PetDetails) -> Result<Vec<PetEvent>, PetError> {
        if self.id.is_none() {
            return Err(PetError::NotRegistered);
        }
        details.validate()?;

        Ok(vec![PetEvent::PetUpdated(PetUpdatedData {
            name: details.name.trim().to_string(),
            species: details.species.trim().to_string(),
            breed: details.breed.clone(),
        })])
    }
}

/// Descriptive fields of a pet.
#[derive(Debug, Clone)]
pub struct PetDetails {
    pub name: String,
    pub species: String,
    pub breed: Option<String>,
}

impl PetDetails {
    pub fn validate(&self) -> Result<(), PetError> {
        if self.name.trim().is_empty() {
            return Err(PetError::NameRequired);
        }
        if self.species.trim().is_empty() {
            return Err(PetError::SpeciesRequired);
        }
        Ok(())
    }
}

/// Service for managing pets.
pub struct PetService<S: TransactionalStore> {
    pipeline: CommandPipeline<S>,
}

impl<S: TransactionalStore> PetService<S> {
    pub fn new(pipeline: CommandPipeline<S>) -> Self {
        Self { pipeline }
    }

    /// Registers a pet. The owner must be a registered user.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn register_pet(
        &self,
        ctx: &CommandContext,
        owner_id: AggregateId,
        details: PetDetails,
    ) -> Result<Pet, DomainError> {
        const COMMAND: &str = "register_pet";
        let started = Instant::now();
        if let Err(e) = details.validate() {
            return self.pipeline.reject(COMMAND, e.into());
        }

        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = register(&mut uow, owner_id, &details).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    /// Updates a pet's descriptive fields.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn update_pet(
        &self,
        ctx: &CommandContext,
        pet_id: AggregateId,
        details: PetDetails,
    ) -> Result<Pet, DomainError> {
        const COMMAND: &str = "update_pet";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = update(&mut uow, pet_id, &details).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }
}

async fn register<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    owner_id: AggregateId,
    details: &PetDetails,
) -> Result<CommandOutcome<Pet>, DomainError> {
    uow.users()?.get_by_id(owner_id).await?;

    let mut root = AggregateRoot::<Pet>::new();
    root.execute(|p| p.register(AggregateId::new(), owner_id, details))?;
    let events = uow.pets()?.save(&mut root).await?;
    Ok(CommandOutcome::with_events(root.into_state(), events))
}

async fn update<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    pet_id: AggregateId,
    details: &PetDetails,
) -> Result<CommandOutcome<Pet>, DomainError> {
    let mut pets = uow.pets()?;
    let mut root = pets.get_by_id(pet_id).await?;
    root.execute(|p| p.update(details))?;
    let events = pets.save(&mut root).await?;
    Ok(CommandOutcome::with_events(root.into_state(), events))
}
