use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::{AppConfig, SchedulingConfig, StoreBackend};
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub availability_store: StoreBackend,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            availability_store: StoreBackend::Memory,
        }
    }
}

impl TestConfig {
    /// Points the Supabase client at a mock server.
    pub fn with_supabase(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            availability_store: StoreBackend::Supabase,
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            availability_store: self.availability_store,
            scheduling: SchedulingConfig::default(),
            port: 0,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn provider(email: &str) -> Self {
        Self::new(email, "provider")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST rows for the scheduling tables.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    /// A `provider_availability` row as PostgREST returns it (seconds on times).
    pub fn availability_row(
        id: &str,
        provider_id: &str,
        current_appointments: u32,
        max_appointments: u32,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "provider_id": provider_id,
            "date": "2024-12-15",
            "start_time": "09:00:00",
            "end_time": "17:00:00",
            "timezone": "America/New_York",
            "utc_start_time": "2024-12-15T14:00:00+00:00",
            "utc_end_time": "2024-12-15T22:00:00+00:00",
            "is_recurring": false,
            "recurrence_pattern": null,
            "recurrence_end_date": null,
            "recurrence_group_id": null,
            "slot_duration": 30,
            "break_duration": 0,
            "status": status,
            "max_appointments_per_slot": max_appointments,
            "current_appointments": current_appointments,
            "appointment_type": "consultation",
            "location": { "type": "clinic", "address": "12 Harbor St" },
            "pricing": { "base_fee": 120.0, "insurance_accepted": true, "currency": "USD" },
            "special_requirements": [],
            "notes": null,
            "created_at": "2024-12-01T00:00:00+00:00",
            "updated_at": "2024-12-01T00:00:00+00:00"
        })
    }

    pub fn provider_row(id: &str, name: &str, specialization: &str, city: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "specialization": specialization,
            "clinic_name": format!("{} Clinic", name),
            "city": city,
            "address": null,
            "rating": 4.7
        })
    }

    pub fn error_response(message: &str) -> serde_json::Value {
        json!({
            "code": "PGRST000",
            "message": message,
            "details": null,
            "hint": null
        })
    }
}
