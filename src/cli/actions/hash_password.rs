use crate::credentials::hash_password;
use anyhow::{bail, Context, Result};
use argon2::Params;
use secrecy::{ExposeSecret, SecretString};
use std::io::{self, BufRead};

#[derive(Debug)]
pub struct Args {
    /// Read from stdin when absent.
    pub password: Option<SecretString>,
}

/// Print the PHC hash of the given password.
/// # Errors
/// Returns an error if stdin cannot be read, the password is empty, or hashing fails.
pub fn execute(args: Args) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => {
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .context("failed to read password from stdin")?;
            SecretString::from(line.trim_end_matches(['\r', '\n']).to_string())
        }
    };

    if password.expose_secret().is_empty() {
        bail!("password must not be empty");
    }

    let phc = hash_password(password.expose_secret(), Params::default())?;
    println!("{phc}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_password_is_rejected() {
        let result = execute(Args {
            password: Some(SecretString::from(String::new())),
        });
        assert!(result.is_err());
    }
}
