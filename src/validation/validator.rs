/*!
 * Spec Validator
 * Total, side-effect-free request validation
 *
 * Checks run in a fixed order: required fields, name, owner, capability
 * duplicates, capability resolution, then network token availability.
 * Nothing downstream is invoked until every check has passed.
 */

use super::types::*;
use crate::core::limits::{MAX_OWNER_LEN, MAX_WORKLOAD_NAME_LEN};
use crate::core::{AuthToken, ValidationError};
use crate::registry::CapabilityRegistry;
use tracing::debug;

/// Check a workload name against the charset and length constraint
///
/// Lowercase ASCII letters, digits and interior hyphens; at most
/// `MAX_WORKLOAD_NAME_LEN` characters.
pub fn validate_workload_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::missing_field("name"));
    }
    if name.len() > MAX_WORKLOAD_NAME_LEN {
        return Err(ValidationError::invalid_name(
            name,
            format!(
                "Workload name '{}' is {} characters; the limit is {}",
                name,
                name.len(),
                MAX_WORKLOAD_NAME_LEN
            ),
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(ValidationError::invalid_name(
            name,
            format!(
                "Workload name '{}' contains '{}'; use lowercase letters, digits and hyphens",
                name, bad
            ),
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(ValidationError::invalid_name(
            name,
            format!("Workload name '{}' must not start or end with a hyphen", name),
        ));
    }
    Ok(())
}

/// Check an owner identifier; owners become storage path components
pub fn validate_owner(owner: &str) -> Result<(), ValidationError> {
    if owner.trim().is_empty() {
        return Err(ValidationError::missing_field("owner"));
    }
    if owner.len() > MAX_OWNER_LEN {
        return Err(ValidationError::invalid_owner(
            owner,
            format!("Owner identifier exceeds {} characters", MAX_OWNER_LEN),
        ));
    }
    if owner == "." || owner == ".." {
        return Err(ValidationError::invalid_owner(owner, "Owner identifier is reserved"));
    }
    if let Some(bad) = owner
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
    {
        return Err(ValidationError::invalid_owner(
            owner,
            format!("Owner identifier contains '{}'", bad.escape_default()),
        ));
    }
    Ok(())
}

/// Validates requests against the capability registry
#[derive(Debug, Clone)]
pub struct SpecValidator {
    registry: CapabilityRegistry,
    default_token: Option<AuthToken>,
}

impl SpecValidator {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self {
            registry,
            default_token: None,
        }
    }

    /// Token used when a request wants a network identity but carries none
    pub fn with_default_token(mut self, token: Option<AuthToken>) -> Self {
        self.default_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn validate(&self, request: &WorkloadRequest) -> Result<ValidSpec, ValidationError> {
        let name = request
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ValidationError::missing_field("name"))?;
        let owner = request
            .owner
            .as_deref()
            .filter(|o| !o.trim().is_empty())
            .ok_or_else(|| ValidationError::missing_field("owner"))?;

        validate_workload_name(name)?;
        validate_owner(owner)?;

        let capabilities = request.capabilities.clone().unwrap_or_default();
        let mut duplicates: Vec<String> = Vec::new();
        for (i, id) in capabilities.iter().enumerate() {
            if capabilities[..i].contains(id) && !duplicates.contains(id) {
                duplicates.push(id.clone());
            }
        }
        if !duplicates.is_empty() {
            return Err(ValidationError::duplicate_capabilities(duplicates));
        }

        let descriptors = self.registry.resolve(&capabilities)?;

        let auth_token = match request.supplied_token() {
            Some(token) => Some(token.clone()),
            None if request.wants_network_identity => Some(
                self.default_token
                    .clone()
                    .ok_or_else(|| ValidationError::missing_field("network_auth_token"))?,
            ),
            None => None,
        };

        if let Some(hint) = request.workspace.as_deref() {
            debug!(workload = name, workspace = hint, "Workspace path is derived from owner and name");
        }

        Ok(ValidSpec {
            spec: WorkloadSpec {
                name: name.to_string(),
                owner: owner.to_string(),
                capabilities,
                wants_storage: request.storage_requested(),
                wants_network_identity: auth_token.is_some(),
            },
            descriptors,
            auth_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ValidationKind;
    use crate::registry::CapabilityDescriptor;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn validator() -> SpecValidator {
        SpecValidator::new(CapabilityRegistry::from_descriptors([
            CapabilityDescriptor::inline("git", "git"),
            CapabilityDescriptor::inline("fish", "fish"),
        ]))
    }

    #[test]
    fn test_valid_request() {
        let valid = validator()
            .validate(&WorkloadRequest::new("dev1", "u1").with_capabilities(["git", "fish"]))
            .unwrap();
        assert_eq!(valid.spec.capabilities, vec!["git".to_string(), "fish".to_string()]);
        assert_eq!(valid.descriptors.len(), 2);
        assert!(!valid.spec.wants_storage);
        assert!(valid.auth_token.is_none());
    }

    #[test]
    fn test_missing_fields_checked_first() {
        let request = WorkloadRequest {
            owner: Some("u1".into()),
            capabilities: Some(vec!["does-not-exist".into()]),
            ..Default::default()
        };
        let err = validator().validate(&request).unwrap_err();
        assert_eq!(err.kind, ValidationKind::MissingField);
        assert_eq!(err.field, "name");

        let err = validator()
            .validate(&WorkloadRequest {
                name: Some("dev1".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.field, "owner");
    }

    #[test]
    fn test_name_checked_before_capabilities() {
        let err = validator()
            .validate(
                &WorkloadRequest::new("a-name-too-long-for-limit", "u1")
                    .with_capabilities(["does-not-exist"]),
            )
            .unwrap_err();
        assert_eq!(err.kind, ValidationKind::InvalidName);
    }

    #[test]
    fn test_name_rules() {
        for good in ["a", "dev1", "web-01", "abcdefghijk"] {
            assert!(validate_workload_name(good).is_ok(), "{}", good);
        }
        for bad in ["Dev1", "-dev", "dev-", "dev_1", "dev.1", "abcdefghijkl", "dév"] {
            let err = validate_workload_name(bad).unwrap_err();
            assert_eq!(err.kind, ValidationKind::InvalidName, "{}", bad);
        }
    }

    #[test]
    fn test_owner_rules() {
        assert!(validate_owner("chat_123").is_ok());
        assert_eq!(validate_owner("  ").unwrap_err().kind, ValidationKind::MissingField);
        assert_eq!(validate_owner("..").unwrap_err().kind, ValidationKind::InvalidOwner);
        assert_eq!(validate_owner("a/b").unwrap_err().kind, ValidationKind::InvalidOwner);
        assert_eq!(validate_owner("a@b").unwrap_err().kind, ValidationKind::InvalidOwner);
    }

    #[test]
    fn test_duplicate_capabilities_rejected() {
        let err = validator()
            .validate(&WorkloadRequest::new("dev1", "u1").with_capabilities(["git", "fish", "git"]))
            .unwrap_err();
        assert_eq!(err.kind, ValidationKind::DuplicateCapability);
        assert_eq!(err.offending, vec!["git".to_string()]);
    }

    #[test]
    fn test_unknown_capabilities_all_reported() {
        let err = validator()
            .validate(&WorkloadRequest::new("dev1", "u1").with_capabilities(["x", "git", "y"]))
            .unwrap_err();
        assert_eq!(err.kind, ValidationKind::UnknownCapability);
        assert_eq!(err.offending, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_network_token_resolution() {
        let request = WorkloadRequest::new("dev1", "u1").with_network_identity(None);
        let err = validator().validate(&request).unwrap_err();
        assert_eq!(err.field, "network_auth_token");

        let valid = validator()
            .with_default_token(Some(AuthToken::new("tskey-default")))
            .validate(&request)
            .unwrap();
        assert!(valid.spec.wants_network_identity);
        assert_eq!(valid.auth_token.unwrap().expose(), "tskey-default");

        let explicit = WorkloadRequest {
            network_auth_token: Some(AuthToken::new("tskey-explicit")),
            ..WorkloadRequest::new("dev1", "u1")
        };
        let valid = validator().validate(&explicit).unwrap();
        assert!(valid.spec.wants_network_identity);
    }

    #[test]
    fn test_workspace_hint_requests_storage() {
        let request = WorkloadRequest {
            workspace: Some("/tank/users/u1/containers/dev1/workspace".into()),
            ..WorkloadRequest::new("dev1", "u1")
        };
        assert!(validator().validate(&request).unwrap().spec.wants_storage);
    }

    #[test]
    fn test_request_parses_from_json() {
        let request: WorkloadRequest = serde_json::from_str(
            r#"{"name":"dev1","owner":"u1","capabilities":["git"],"network_auth_token":"k"}"#,
        )
        .unwrap();
        let valid = validator().validate(&request).unwrap();
        assert!(valid.spec.wants_network_identity);
        assert!(!valid.spec.wants_storage);
    }

    proptest! {
        #[test]
        fn prop_conforming_names_accepted(name in "[a-z0-9]([a-z0-9-]{0,9}[a-z0-9])?") {
            prop_assert!(validate_workload_name(&name).is_ok());
        }

        #[test]
        fn prop_long_names_rejected(name in "[a-z0-9]{12,40}") {
            prop_assert_eq!(
                validate_workload_name(&name).unwrap_err().kind,
                ValidationKind::InvalidName
            );
        }

        #[test]
        fn prop_uppercase_rejected(prefix in "[a-z]{0,4}", upper in "[A-Z]", suffix in "[a-z]{0,4}") {
            let name = format!("{}{}{}", prefix, upper, suffix);
            prop_assert!(validate_workload_name(&name).is_err());
        }
    }
}
