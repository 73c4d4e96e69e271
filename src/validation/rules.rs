//! Request input validation against the configured request policy.

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::infrastructure::config::RequestPolicy;
use crate::services::errors::{ServiceError, ServiceResult};
use crate::services::requests::CreateRequestInput;

/// Validates a new-request input: structural constraints, justification
/// length, and the temporary-access window. Fails without mutating any
/// state.
pub fn validate_new_request(
    input: &CreateRequestInput,
    policy: &RequestPolicy,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    input
        .validate()
        .map_err(|err| ServiceError::Validation(err.to_string()))?;

    if input.business_justification.trim().len() < policy.min_justification_length {
        return Err(ServiceError::Validation(format!(
            "business justification must be at least {} characters",
            policy.min_justification_length
        )));
    }

    if input.is_temporary {
        let Some(end) = input.requested_end_date else {
            return Err(ServiceError::Validation(
                "temporary access requires an end date".to_string(),
            ));
        };
        if end <= now {
            return Err(ServiceError::Validation(
                "temporary access end date must be in the future".to_string(),
            ));
        }
        if (end - now).num_days() > policy.max_temporary_days {
            return Err(ServiceError::Validation(format!(
                "temporary access is limited to {} days",
                policy.max_temporary_days
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn input() -> CreateRequestInput {
        CreateRequestInput {
            requester_user_id: "JSMITH".to_string(),
            requester_name: "John Smith".to_string(),
            requester_email: "john.smith@company.com".to_string(),
            target_user_id: "MBROWN".to_string(),
            target_user_name: "Mary Brown".to_string(),
            target_user_email: None,
            target_user_department: Some("Finance".to_string()),
            requested_roles: vec!["Z_AP_CLERK".to_string()],
            business_justification: "Quarter-end invoice backlog requires AP access".to_string(),
            request_type: Default::default(),
            is_temporary: false,
            requested_end_date: None,
            ticket_reference: None,
        }
    }

    #[test]
    fn accepts_well_formed_input() {
        let policy = RequestPolicy::default();
        assert!(validate_new_request(&input(), &policy, Utc::now()).is_ok());
    }

    #[test]
    fn rejects_short_justification() {
        let policy = RequestPolicy::default();
        let mut bad = input();
        bad.business_justification = "because".to_string();
        let err = validate_new_request(&bad, &policy, Utc::now()).unwrap_err();
        assert_eq!(err.kind(), "VALIDATION_ERROR");
    }

    #[test]
    fn temporary_access_needs_a_bounded_end_date() {
        let policy = RequestPolicy::default();
        let now = Utc::now();

        let mut missing_end = input();
        missing_end.is_temporary = true;
        assert!(validate_new_request(&missing_end, &policy, now).is_err());

        let mut too_long = input();
        too_long.is_temporary = true;
        too_long.requested_end_date = Some(now + Duration::days(policy.max_temporary_days + 10));
        assert!(validate_new_request(&too_long, &policy, now).is_err());

        let mut ok = input();
        ok.is_temporary = true;
        ok.requested_end_date = Some(now + Duration::days(30));
        assert!(validate_new_request(&ok, &policy, now).is_ok());
    }

    #[test]
    fn rejects_empty_role_list() {
        let policy = RequestPolicy::default();
        let mut bad = input();
        bad.requested_roles.clear();
        assert!(validate_new_request(&bad, &policy, Utc::now()).is_err());
    }
}
