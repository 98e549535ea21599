// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Payment-gateway provider profiles.
//!
//! Every provider names its callback fields differently and has its own
//! idea of a "success" result code. A [`ProviderProfile`] captures that
//! mapping as plain data, so adding a provider never touches the
//! reconciliation logic. Signature verification is mandatory: a callback
//! whose digest does not match the provider secret is rejected before any
//! lookup happens, and the stored `signature_valid` flag is always the
//! computed result, never an assumption.

use crate::base::OrderId;
use crate::error::CallbackError;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// Field mapping and verification material for one provider.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub id: String,
    pub order_id_field: String,
    pub result_code_field: String,
    pub signature_field: String,
    pub success_code: String,
    /// Shared secret for the callback digest.
    pub secret: String,
}

impl ProviderProfile {
    /// MoMo-style callbacks: `orderId` / `resultCode`, success is `"0"`.
    pub fn momo(secret: &str) -> Self {
        Self {
            id: "momo".to_string(),
            order_id_field: "orderId".to_string(),
            result_code_field: "resultCode".to_string(),
            signature_field: "signature".to_string(),
            success_code: "0".to_string(),
            secret: secret.to_string(),
        }
    }

    /// VNPay-style callbacks: `vnp_TxnRef` / `vnp_ResponseCode`, success is `"00"`.
    pub fn vnpay(secret: &str) -> Self {
        Self {
            id: "vnpay".to_string(),
            order_id_field: "vnp_TxnRef".to_string(),
            result_code_field: "vnp_ResponseCode".to_string(),
            signature_field: "vnp_SecureHash".to_string(),
            success_code: "00".to_string(),
            secret: secret.to_string(),
        }
    }

    /// ZaloPay-style callbacks: `app_trans_id` / `status`, success is `"1"`.
    pub fn zalopay(secret: &str) -> Self {
        Self {
            id: "zalopay".to_string(),
            order_id_field: "app_trans_id".to_string(),
            result_code_field: "status".to_string(),
            signature_field: "mac".to_string(),
            success_code: "1".to_string(),
            secret: secret.to_string(),
        }
    }

    pub fn is_success(&self, result_code: &str) -> bool {
        result_code == self.success_code
    }

    /// Digest a callback the way this provider signs it.
    pub fn sign(&self, order_id: &str, result_code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(order_id.as_bytes());
        hasher.update(b"|");
        hasher.update(result_code.as_bytes());
        hasher.update(b"|");
        hasher.update(self.secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A callback reduced to the canonical pair every provider must yield.
#[derive(Debug, Clone)]
pub struct ParsedCallback {
    pub order_id: OrderId,
    pub result_code: String,
    pub success: bool,
    /// Full payload, passed through for audit storage.
    pub payload: serde_json::Value,
}

/// Provider profiles indexed by provider id.
#[derive(Debug, Default)]
pub struct GatewayRegistry {
    profiles: DashMap<String, ProviderProfile>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self {
            profiles: DashMap::new(),
        }
    }

    pub fn register(&self, profile: ProviderProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    pub fn profile(&self, provider: &str) -> Option<ProviderProfile> {
        self.profiles.get(provider).map(|p| p.value().clone())
    }

    /// Parses and verifies a raw provider callback.
    ///
    /// # Errors
    ///
    /// - [`CallbackError::UnknownProvider`] for an unregistered id.
    /// - [`CallbackError::MalformedPayload`] for invalid JSON or a missing
    ///   mapped field.
    /// - [`CallbackError::SignatureMismatch`] when the digest check fails.
    pub fn parse(&self, provider: &str, raw_payload: &str) -> Result<ParsedCallback, CallbackError> {
        let profile = self
            .profiles
            .get(provider)
            .ok_or_else(|| CallbackError::UnknownProvider(provider.to_string()))?;

        let payload: serde_json::Value = serde_json::from_str(raw_payload)
            .map_err(|e| CallbackError::MalformedPayload(e.to_string()))?;

        let order_id = field_as_string(&payload, &profile.order_id_field)?;
        let result_code = field_as_string(&payload, &profile.result_code_field)?;
        let signature = field_as_string(&payload, &profile.signature_field)?;

        let expected = profile.sign(&order_id, &result_code);
        if !expected.eq_ignore_ascii_case(&signature) {
            return Err(CallbackError::SignatureMismatch);
        }

        Ok(ParsedCallback {
            order_id: OrderId(order_id),
            success: profile.is_success(&result_code),
            result_code,
            payload,
        })
    }
}

/// Providers encode codes as strings or bare numbers; both are accepted.
fn field_as_string(payload: &serde_json::Value, field: &str) -> Result<String, CallbackError> {
    match payload.get(field) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        Some(_) | None => Err(CallbackError::MalformedPayload(format!(
            "missing or non-scalar field '{field}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> GatewayRegistry {
        let registry = GatewayRegistry::new();
        registry.register(ProviderProfile::momo("momo-secret"));
        registry.register(ProviderProfile::vnpay("vnpay-secret"));
        registry.register(ProviderProfile::zalopay("zalopay-secret"));
        registry
    }

    fn signed_payload(profile: &ProviderProfile, order: &str, code: &str) -> String {
        json!({
            &profile.order_id_field: order,
            &profile.result_code_field: code,
            &profile.signature_field: profile.sign(order, code),
        })
        .to_string()
    }

    #[test]
    fn momo_success_code_is_zero() {
        let registry = registry();
        let profile = ProviderProfile::momo("momo-secret");

        let parsed = registry
            .parse("momo", &signed_payload(&profile, "ORD-1", "0"))
            .unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.order_id, OrderId("ORD-1".to_string()));

        let parsed = registry
            .parse("momo", &signed_payload(&profile, "ORD-1", "1006"))
            .unwrap();
        assert!(!parsed.success);
    }

    #[test]
    fn vnpay_success_code_is_double_zero() {
        let registry = registry();
        let profile = ProviderProfile::vnpay("vnpay-secret");

        assert!(
            registry
                .parse("vnpay", &signed_payload(&profile, "ORD-2", "00"))
                .unwrap()
                .success
        );
        // Plain "0" is NOT VNPay's success code.
        assert!(
            !registry
                .parse("vnpay", &signed_payload(&profile, "ORD-2", "0"))
                .unwrap()
                .success
        );
    }

    #[test]
    fn zalopay_accepts_numeric_status() {
        let registry = registry();
        let profile = ProviderProfile::zalopay("zalopay-secret");

        // ZaloPay sends status as a bare number.
        let payload = json!({
            "app_trans_id": "ORD-3",
            "status": 1,
            "mac": profile.sign("ORD-3", "1"),
        });
        let parsed = registry.parse("zalopay", &payload.to_string()).unwrap();
        assert!(parsed.success);
    }

    #[test]
    fn unknown_provider_rejected() {
        let registry = registry();
        let result = registry.parse("acme", "{}");
        assert_eq!(
            result.unwrap_err(),
            CallbackError::UnknownProvider("acme".to_string())
        );
    }

    #[test]
    fn invalid_json_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.parse("momo", "not json"),
            Err(CallbackError::MalformedPayload(_))
        ));
    }

    #[test]
    fn missing_field_rejected() {
        let registry = registry();
        let payload = json!({"resultCode": "0", "signature": "x"}).to_string();
        assert!(matches!(
            registry.parse("momo", &payload),
            Err(CallbackError::MalformedPayload(_))
        ));
    }

    #[test]
    fn tampered_signature_rejected() {
        let registry = registry();
        let profile = ProviderProfile::momo("momo-secret");
        let payload = json!({
            "orderId": "ORD-1",
            "resultCode": "0",
            "signature": profile.sign("ORD-1", "1006"),
        })
        .to_string();
        assert_eq!(
            registry.parse("momo", &payload).unwrap_err(),
            CallbackError::SignatureMismatch
        );
    }

    #[test]
    fn signature_comparison_is_case_insensitive() {
        let registry = registry();
        let profile = ProviderProfile::momo("momo-secret");
        let payload = json!({
            "orderId": "ORD-1",
            "resultCode": "0",
            "signature": profile.sign("ORD-1", "0").to_uppercase(),
        })
        .to_string();
        assert!(registry.parse("momo", &payload).is_ok());
    }
}
