use crate::error::AuthError;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Validated sign-up input. The email is already normalized.
#[derive(Clone, Debug)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Trim and lowercase an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_registration(name: &str, email: &str, password: &str) -> Result<Registration, AuthError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AuthError::InvalidInput("name is required".into()));
    }

    let email = normalize_email(email);
    if !is_plausible_email(&email) {
        return Err(AuthError::InvalidInput(format!("invalid email: {email}")));
    }

    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    Ok(Registration {
        name: name.to_string(),
        email,
        password: password.to_string(),
    })
}

/// `local@domain.tld`: one `@`, non-empty local part, and a dot inside the domain.
fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.contains(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_and_normalizes() {
        let reg = validate_registration(" Jane ", " Jane@Example.COM ", "securepass456").unwrap();
        assert_eq!(reg.name, "Jane");
        assert_eq!(reg.email, "jane@example.com");
    }

    #[test]
    fn rejects_empty_name() {
        assert!(matches!(
            validate_registration("  ", "a@b.co", "password123"),
            Err(AuthError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_bad_emails() {
        for email in ["", "plain", "@example.com", "a@", "a@example", "a@.com", "a b@x.io", "a@b@c.io"] {
            assert!(
                validate_registration("A", email, "password123").is_err(),
                "accepted {email:?}"
            );
        }
    }

    #[test]
    fn rejects_short_password() {
        let err = validate_registration("A", "a@b.co", "short").unwrap_err();
        assert!(err.to_string().contains("at least 8"));
    }
}
