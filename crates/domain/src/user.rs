//! User aggregate: customers, vendor owners and administrators.

use std::time::Instant;

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use store::{TransactionalStore, UniqueKey};
use thiserror::Error;

use crate::aggregate::{Aggregate, AggregateRoot, DomainEvent};
use crate::command::{CommandOutcome, CommandPipeline};
use crate::context::CommandContext;
use crate::error::DomainError;
use crate::unit_of_work::UnitOfWork;

/// Errors that can occur during user operations.
#[derive(Debug, Error)]
pub enum UserError {
    /// Email is missing or malformed.
    #[error("Invalid email: {0:?}")]
    InvalidEmail(String),

    /// Full name is required.
    #[error("Full name is required")]
    NameRequired,

    /// Credential hash is required.
    #[error("Credential hash is required")]
    CredentialRequired,

    /// User is already registered.
    #[error("User already registered")]
    AlreadyRegistered,

    /// Operation on a user that was never registered.
    #[error("User is not registered")]
    NotRegistered,
}

/// Role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum UserRole {
    #[default]
    Customer,
    VendorOwner,
    Admin,
}

/// Events that can occur on a user aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum UserEvent {
    /// User registered.
    UserRegistered(UserRegisteredData),

    /// Name or phone changed.
    UserProfileUpdated(UserProfileUpdatedData),

    /// Credentials were replaced.
    UserCredentialsChanged(UserCredentialsChangedData),
}

impl DomainEvent for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::UserRegistered(_) => "UserRegistered",
            UserEvent::UserProfileUpdated(_) => "UserProfileUpdated",
            UserEvent::UserCredentialsChanged(_) => "UserCredentialsChanged",
        }
    }
}

/// Data for UserRegistered event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRegisteredData {
    pub user_id: AggregateId,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    /// Never published: skipped when the event is serialized.
    #[serde(skip_serializing, default)]
    pub credential_hash: String,
    pub registered_at: DateTime<Utc>,
}

/// Data for UserProfileUpdated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfileUpdatedData {
    pub full_name: String,
    pub phone: Option<String>,
}

/// Data for UserCredentialsChanged event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCredentialsChangedData {
    /// Never published: skipped when the event is serialized.
    #[serde(skip_serializing, default)]
    pub credential_hash: String,
    pub changed_at: DateTime<Utc>,
}

/// User aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    id: Option<AggregateId>,
    email: String,
    full_name: String,
    phone: Option<String>,
    role: UserRole,
    credential_hash: String,
    credentials_changed_at: Option<DateTime<Utc>>,
}

impl Aggregate for User {
    type Event = UserEvent;
    type Error = UserError;

    fn aggregate_type() -> &'static str {
        "User"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            UserEvent::UserRegistered(data) => {
                self.id = Some(data.user_id);
                self.email = data.email;
                self.full_name = data.full_name;
                self.phone = data.phone;
                self.role = data.role;
                self.credential_hash = data.credential_hash;
            }
            UserEvent::UserProfileUpdated(data) => {
                self.full_name = data.full_name;
                self.phone = data.phone;
            }
            UserEvent::UserCredentialsChanged(data) => {
                self.credential_hash = data.credential_hash;
                self.credentials_changed_at = Some(data.changed_at);
            }
        }
    }

    fn unique_keys(&self) -> Vec<UniqueKey> {
        vec![Self::email_key(&self.email)]
    }
}

impl User {
    /// Unique key for an email address, compared case-insensitively.
    pub fn email_key(email: &str) -> UniqueKey {
        UniqueKey::new("email", email.trim().to_lowercase())
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn role(&self) -> UserRole {
        self.role
    }

    pub fn credentials_changed_at(&self) -> Option<DateTime<Utc>> {
        self.credentials_changed_at
    }

    /// Returns true if `hash` matches the stored credential hash.
    pub fn credential_matches(&self, hash: &str) -> bool {
        !self.credential_hash.is_empty() && self.credential_hash == hash
    }

    /// Registers a new user.
    pub fn register(
        &self,
        user_id: AggregateId,
        cmd: &RegisterUser,
    ) -> Result<Vec<UserEvent>, UserError> {
        if self.id.is_some() {
            return Err(UserError::AlreadyRegistered);
        }
        cmd.validate()?;

        Ok(vec![UserEvent::UserRegistered(UserRegisteredData {
            user_id,
            email: cmd.email.trim().to_lowercase(),
            full_name: cmd.full_name.trim().to_string(),
            phone: cmd.phone.clone(),
            role: cmd.role,
            credential_hash: cmd.credential_hash.clone(),
            registered_at: Utc::now(),
        })])
    }

    /// Updates name and phone. Unchanged values produce no event.
    pub fn update_profile(
        &self,
        full_name: &str,
        phone: Option<String>,
    ) -> Result<Vec<UserEvent>, UserError> {
        if self.id.is_none() {
            return Err(UserError::NotRegistered);
        }
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(UserError::NameRequired);
        }
        if full_name == self.full_name && phone == self.phone {
            return Ok(vec![]);
        }

        Ok(vec![UserEvent::UserProfileUpdated(UserProfileUpdatedData {
            full_name: full_name.to_string(),
            phone,
        })])
    }

    /// Replaces the credential hash.
    pub fn change_credentials(&self, credential_hash: &str) -> Result<Vec<UserEvent>, UserError> {
        if self.id.is_none() {
            return Err(UserError::NotRegistered);
        }
        if credential_hash.is_empty() {
            return Err(UserError::CredentialRequired);
        }

        Ok(vec![UserEvent::UserCredentialsChanged(
            UserCredentialsChangedData {
                credential_hash: credential_hash.to_string(),
                changed_at: Utc::now(),
            },
        )])
    }
}

/// Command to register a user.
#[derive(Debug, Clone)]
pub struct RegisterUser {
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    /// Already hashed by the auth subsystem.
    pub credential_hash: String,
}

impl RegisterUser {
    /// Checks the command shape.
    pub fn validate(&self) -> Result<(), UserError> {
        let email = self.email.trim();
        let valid_email = email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !valid_email {
            return Err(UserError::InvalidEmail(self.email.clone()));
        }
        if self.full_name.trim().is_empty() {
            return Err(UserError::NameRequired);
        }
        if self.credential_hash.is_empty() {
            return Err(UserError::CredentialRequired);
        }
        Ok(())
    }
}

/// Service for managing users.
pub struct UserService<S: TransactionalStore> {
    pipeline: CommandPipeline<S>,
}

impl<S: TransactionalStore> UserService<S> {
    pub fn new(pipeline: CommandPipeline<S>) -> Self {
        Self { pipeline }
    }

    /// Registers a user. A taken email is a conflict.
    #[tracing::instrument(skip(self, ctx, cmd), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn register_user(
        &self,
        ctx: &CommandContext,
        cmd: RegisterUser,
    ) -> Result<User, DomainError> {
        const COMMAND: &str = "register_user";
        let started = Instant::now();
        if let Err(e) = cmd.validate() {
            return self.pipeline.reject(COMMAND, e.into());
        }

        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = register(&mut uow, &cmd).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    /// Updates a user's name and phone.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn update_profile(
        &self,
        ctx: &CommandContext,
        user_id: AggregateId,
        full_name: String,
        phone: Option<String>,
    ) -> Result<User, DomainError> {
        const COMMAND: &str = "update_profile";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = mutate(&mut uow, user_id, |u| u.update_profile(&full_name, phone)).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    /// Replaces a user's credential hash.
    #[tracing::instrument(skip(self, ctx, credential_hash), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn change_credentials(
        &self,
        ctx: &CommandContext,
        user_id: AggregateId,
        credential_hash: String,
    ) -> Result<User, DomainError> {
        const COMMAND: &str = "change_credentials";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = mutate(&mut uow, user_id, |u| u.change_credentials(&credential_hash)).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    /// Loads a user by id.
    pub async fn get_user(
        &self,
        ctx: &CommandContext,
        user_id: AggregateId,
    ) -> Result<User, DomainError> {
        const COMMAND: &str = "get_user";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = match uow.users() {
            Ok(mut users) => users
                .get_by_id(user_id)
                .await
                .map(|root| CommandOutcome::unchanged(root.into_state())),
            Err(e) => Err(e),
        };
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }
}

async fn register<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    cmd: &RegisterUser,
) -> Result<CommandOutcome<User>, DomainError> {
    let mut root = AggregateRoot::<User>::new();
    root.execute(|u| u.register(AggregateId::new(), cmd))?;
    let events = uow.users()?.save(&mut root).await?;
    Ok(CommandOutcome::with_events(root.into_state(), events))
}

async fn mutate<S, F>(
    uow: &mut UnitOfWork<S>,
    user_id: AggregateId,
    decide: F,
) -> Result<CommandOutcome<User>, DomainError>
where
    S: TransactionalStore,
    F: FnOnce(&User) -> Result<Vec<UserEvent>, UserError>,
{
    let mut users = uow.users()?;
    let mut root = users.get_by_id(user_id).await?;
    root.execute(decide)?;
    let events = users.save(&mut root).await?;
    Ok(CommandOutcome::with_events(root.into_state(), events))
}
