//! Storage collaborator client
//!
//! Businesses, bookable services and confirmed bookings live in an external
//! CRUD service; the call pipeline only consumes the narrow contract below.
//! `HttpStorage` talks to the real service; `MemoryStorage` backs tests and
//! local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage request failed: {0}")]
    Request(String),
    #[error("Malformed storage response: {0}")]
    Decode(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: Uuid,
    pub name: String,
    pub phone_number: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub hours: Option<String>,
    #[serde(default)]
    pub policies: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: Uuid,
    pub name: String,
    pub duration_minutes: u32,
}

/// Booking commit payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBooking {
    pub business_id: Uuid,
    pub service_id: Uuid,
    pub customer_name: String,
    pub customer_phone: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub booking: NewBooking,
}

/// Contract consumed by the call pipeline
#[async_trait]
pub trait Storage: Send + Sync {
    /// Resolve the business answering a dialed number.
    async fn business_by_phone(&self, phone: &str) -> StorageResult<Option<Business>>;

    /// Bookable services for a business.
    async fn services_for_business(&self, business_id: Uuid) -> StorageResult<Vec<ServiceRecord>>;

    /// Commit a confirmed booking; returns the record with its generated id.
    async fn create_booking(&self, booking: NewBooking) -> StorageResult<BookingRecord>;
}

/// HTTP client for the storage service
pub struct HttpStorage {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Storage for HttpStorage {
    async fn business_by_phone(&self, phone: &str) -> StorageResult<Option<Business>> {
        let url = format!("{}/businesses/by-phone/{phone}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| StorageError::Request(e.to_string()))?;
        let business = response
            .json::<Business>()
            .await
            .map_err(|e| StorageError::Decode(e.to_string()))?;
        Ok(Some(business))
    }

    async fn services_for_business(&self, business_id: Uuid) -> StorageResult<Vec<ServiceRecord>> {
        let url = format!("{}/businesses/{business_id}/services", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| StorageError::Request(e.to_string()))?;
        response
            .json::<Vec<ServiceRecord>>()
            .await
            .map_err(|e| StorageError::Decode(e.to_string()))
    }

    async fn create_booking(&self, booking: NewBooking) -> StorageResult<BookingRecord> {
        let url = format!("{}/bookings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&booking)
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| StorageError::Request(e.to_string()))?;
        response
            .json::<BookingRecord>()
            .await
            .map_err(|e| StorageError::Decode(e.to_string()))
    }
}

/// In-memory storage for tests and local development
#[derive(Default)]
pub struct MemoryStorage {
    businesses: Mutex<Vec<Business>>,
    services: Mutex<HashMap<Uuid, Vec<ServiceRecord>>>,
    bookings: Mutex<Vec<BookingRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_business(&self, business: Business) {
        self.businesses.lock().push(business);
    }

    pub fn add_service(&self, business_id: Uuid, service: ServiceRecord) {
        self.services
            .lock()
            .entry(business_id)
            .or_default()
            .push(service);
    }

    /// Committed bookings, for assertions.
    pub fn bookings(&self) -> Vec<BookingRecord> {
        self.bookings.lock().clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn business_by_phone(&self, phone: &str) -> StorageResult<Option<Business>> {
        Ok(self
            .businesses
            .lock()
            .iter()
            .find(|b| b.phone_number == phone)
            .cloned())
    }

    async fn services_for_business(&self, business_id: Uuid) -> StorageResult<Vec<ServiceRecord>> {
        Ok(self
            .services
            .lock()
            .get(&business_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_booking(&self, booking: NewBooking) -> StorageResult<BookingRecord> {
        let record = BookingRecord {
            id: Uuid::new_v4(),
            booking,
        };
        self.bookings.lock().push(record.clone());
        Ok(record)
    }
}
