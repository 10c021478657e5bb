//! Task records, their locations and contacts, and the draft builder
use super::error::ValidationError;
use super::money::Money;
use super::timestamp::TimeStamp;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    CostReview,
    #[n(2)]
    CostProposed,
    #[n(3)]
    UserCounterProposed,
    #[n(4)]
    DeliveryCounterProposed,
    #[n(5)]
    CostAccepted,
    #[n(6)]
    NegotiationFinalized,
    #[n(7)]
    Assigned,
    #[n(8)]
    Scheduled,
    #[n(9)]
    Completed,
    #[n(10)]
    Expired,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 11] = [
        TaskStatus::Pending,
        TaskStatus::CostReview,
        TaskStatus::CostProposed,
        TaskStatus::UserCounterProposed,
        TaskStatus::DeliveryCounterProposed,
        TaskStatus::CostAccepted,
        TaskStatus::NegotiationFinalized,
        TaskStatus::Assigned,
        TaskStatus::Scheduled,
        TaskStatus::Completed,
        TaskStatus::Expired,
    ];

    pub const fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Expired)
    }

    /// Statuses in which `proposed_cost` must be set.
    pub const fn carries_cost(&self) -> bool {
        matches!(
            self,
            TaskStatus::CostProposed
                | TaskStatus::UserCounterProposed
                | TaskStatus::DeliveryCounterProposed
                | TaskStatus::CostAccepted
                | TaskStatus::NegotiationFinalized
                | TaskStatus::Assigned
        )
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum LocationPurpose {
    #[n(0)]
    Pickup,
    #[n(1)]
    DropOff,
    #[n(2)]
    Stop,
    #[n(3)]
    Other(#[n(0)] String),
}

/// WGS84 position in micro-degrees.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coordinates {
    #[n(0)]
    pub latitude: i32,
    #[n(1)]
    pub longitude: i32,
}

const MICRO: f64 = 1_000_000.0;

impl Coordinates {
    pub const fn new(latitude: i32, longitude: i32) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
    pub fn from_degrees(latitude: f64, longitude: f64) -> Option<Self> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        Some(Self::new(
            (latitude * MICRO).round() as i32,
            (longitude * MICRO).round() as i32,
        ))
    }
    pub fn is_valid(&self) -> bool {
        (-90_000_000..=90_000_000).contains(&self.latitude)
            && (-180_000_000..=180_000_000).contains(&self.longitude)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Location {
    #[n(0)]
    pub purpose: LocationPurpose,
    #[n(1)]
    pub address: String, // resolved label shown to the user
    #[n(2)]
    pub coordinates: Coordinates,
}

impl Location {
    pub fn new(purpose: LocationPurpose, address: impl Into<String>, coordinates: Coordinates) -> Self {
        Self {
            purpose,
            address: address.into(),
            coordinates,
        }
    }
    fn validate(&self) -> Result<(), ValidationError> {
        if self.address.trim().is_empty() {
            return Err(ValidationError::EmptyAddress(format!("{:?}", self.purpose)));
        }
        if !self.coordinates.is_valid() {
            return Err(ValidationError::InvalidCoordinates {
                latitude: self.coordinates.latitude,
                longitude: self.coordinates.longitude,
            });
        }
        Ok(())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ContactPhone {
    #[n(0)]
    pub number: String,
    #[n(1)]
    pub is_primary: bool,
}

impl ContactPhone {
    pub fn new(number: impl Into<String>, is_primary: bool) -> Self {
        Self {
            number: number.into(),
            is_primary,
        }
    }
    // optional leading '+', 7 to 15 digits, spaces and dashes ignored
    fn is_valid(&self) -> bool {
        let body = self.number.trim();
        let body = body.strip_prefix('+').unwrap_or(body);
        let mut digits = 0;
        for c in body.chars() {
            match c {
                '0'..='9' => digits += 1,
                ' ' | '-' => {}
                _ => return false,
            }
        }
        (7..=15).contains(&digits)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    #[n(0)]
    pub id: String, // bech32 "task_" id
    #[n(1)]
    pub version: u64, // owned by the repository, 0 until first save
    #[n(2)]
    pub description: String,
    #[n(3)]
    pub primary_location: Location,
    #[n(4)]
    pub additional_locations: Vec<Location>,
    #[n(5)]
    pub contacts: Vec<ContactPhone>,
    #[n(6)]
    pub scheduled_at: Option<TimeStamp>,
    #[n(7)]
    pub image_ref: Option<String>,
    #[n(8)]
    pub status: TaskStatus,
    #[n(9)]
    pub proposed_cost: Option<Money>,
    #[n(10)]
    pub user_counter_cost: Option<Money>,
    #[n(11)]
    pub cost_notes: Option<String>,
    #[n(12)]
    pub user_counter_notes: Option<String>,
    #[n(13)]
    pub owner_id: String,
    #[n(14)]
    pub reviewer_id: Option<String>,
    #[n(15)]
    pub assigned_agent_id: Option<String>,
    #[n(16)]
    pub created_at: TimeStamp,
}

impl TaskRecord {
    /// The price downstream consumers should charge. A requester's counter is
    /// never the effective cost; only a proposal from the agent is.
    pub fn effective_cost(&self) -> Option<Money> {
        self.proposed_cost
    }

    pub fn primary_contact(&self) -> Option<&ContactPhone> {
        self.contacts.iter().find(|c| c.is_primary)
    }

    /// Primary location followed by the additional ones, in order.
    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        std::iter::once(&self.primary_location).chain(self.additional_locations.iter())
    }

    /// Checks the cross-field rules that tie negotiation fields to status.
    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        if self.proposed_cost.is_some() != self.status.carries_cost() {
            return Err(ValidationError::CostFields(self.status));
        }

        let in_counter = self.status == TaskStatus::UserCounterProposed;
        if self.user_counter_cost.is_some() != in_counter
            || (!in_counter && self.user_counter_notes.is_some())
        {
            return Err(ValidationError::CounterFields(self.status));
        }

        let has_agent = matches!(self.status, TaskStatus::Assigned | TaskStatus::Completed);
        if self.assigned_agent_id.is_some() != has_agent {
            return Err(ValidationError::AssignmentFields(self.status));
        }

        Ok(())
    }

    /// CBOR encoding of the record and its sha256.
    pub fn serialize_with_hash(&self) -> anyhow::Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

/// Requester-side builder for a new task.
#[derive(Debug, Default, Clone)]
pub struct TaskDraft {
    description: Option<String>,
    primary_location: Option<Location>,
    additional_locations: Vec<Location>,
    contacts: Vec<ContactPhone>,
    scheduled_at: Option<TimeStamp>,
    image_ref: Option<String>,
}

impl TaskDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
    pub fn set_primary_location(mut self, location: Location) -> Self {
        self.primary_location = Some(location);
        self
    }
    pub fn add_location(mut self, location: Location) -> Self {
        self.additional_locations.push(location);
        self
    }
    pub fn add_contact(mut self, contact: ContactPhone) -> Self {
        self.contacts.push(contact);
        self
    }
    pub fn set_scheduled_at(mut self, at: TimeStamp) -> Self {
        self.scheduled_at = Some(at);
        self
    }
    pub fn set_image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.description {
            Some(d) if !d.trim().is_empty() => {}
            _ => return Err(ValidationError::EmptyDescription),
        }
        self.primary_location
            .as_ref()
            .ok_or(ValidationError::MissingPrimaryLocation)?
            .validate()?;
        for location in &self.additional_locations {
            location.validate()?;
        }

        if let Some(at) = self.scheduled_at.filter(|at| !at.is_encodable()) {
            return Err(ValidationError::ScheduleOutOfRange(at));
        }

        if let Some(bad) = self.contacts.iter().find(|c| !c.is_valid()) {
            return Err(ValidationError::InvalidPhone(bad.number.clone()));
        }
        let primaries = self.contacts.iter().filter(|c| c.is_primary).count();
        if !self.contacts.is_empty() && primaries != 1 {
            return Err(ValidationError::PrimaryContact(primaries));
        }

        Ok(())
    }

    /// Validates the draft and turns it into a fresh record. A task scheduled
    /// strictly after `now` starts `Scheduled`, anything else `Pending`.
    pub fn submit(
        self,
        id: String,
        owner_id: String,
        now: TimeStamp,
    ) -> Result<TaskRecord, ValidationError> {
        self.validate()?;

        let status = match self.scheduled_at {
            Some(at) if at > now => TaskStatus::Scheduled,
            _ => TaskStatus::Pending,
        };

        Ok(TaskRecord {
            id,
            version: 0,
            description: self.description.unwrap_or_default(),
            primary_location: self
                .primary_location
                .ok_or(ValidationError::MissingPrimaryLocation)?,
            additional_locations: self.additional_locations,
            contacts: self.contacts,
            scheduled_at: self.scheduled_at,
            image_ref: self.image_ref,
            status,
            proposed_cost: None,
            user_counter_cost: None,
            cost_notes: None,
            user_counter_notes: None,
            owner_id,
            reviewer_id: None,
            assigned_agent_id: None,
            created_at: now,
        })
    }
}
