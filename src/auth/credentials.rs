//! Credential management for XNAT authentication
//!
//! Credentials are resolved from an explicit two-line credentials file
//! (username then password) or from the `XNAT_USER`/`XNAT_PASS` environment
//! variables, which may themselves be loaded from a .env file. Interactive
//! setup stores them in .env with owner-only permissions.

use std::env;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use crate::app::client::{ClientConfig, Session};
use crate::constants::{auth, env as env_constants};
use crate::errors::{AuthError, AuthResult};

/// Username and password for one XNAT server
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read credentials from the process environment
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MissingCredentials` if either variable is unset.
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read credentials through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> AuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        match (
            lookup(env_constants::USERNAME),
            lookup(env_constants::PASSWORD),
        ) {
            (Some(username), Some(password)) if !username.is_empty() => {
                Ok(Self::new(username, password))
            }
            _ => Err(AuthError::MissingCredentials),
        }
    }

    /// Read a credentials file whose first line is the username and second
    /// line the password
    ///
    /// # Errors
    ///
    /// Returns `AuthError::CredentialFile` if the file is unreadable or has
    /// fewer than two non-empty lines.
    pub fn from_file(path: &Path) -> AuthResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| AuthError::CredentialFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut lines = contents.lines().map(str::trim);
        match (lines.next(), lines.next()) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Ok(Self::new(username, password))
            }
            _ => Err(AuthError::CredentialFile {
                path: path.to_path_buf(),
                reason: "expected the username on the first line and the password on the second"
                    .to_string(),
            }),
        }
    }

    /// Resolve credentials, preferring an explicit file over the environment
    pub fn resolve(file: Option<&Path>) -> AuthResult<Self> {
        match file {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }
}

/// Authentication status information
#[derive(Debug, Clone)]
pub struct AuthStatus {
    /// Whether username environment variable is set
    pub username_set: bool,
    /// Whether password environment variable is set
    pub password_set: bool,
    /// Whether .env file exists in current directory
    pub dotenv_file_exists: bool,
    /// Whether credentials have been verified (None = not tested)
    pub credentials_valid: Option<bool>,
}

impl AuthStatus {
    /// Check if both credentials are available in environment
    pub fn has_credentials(&self) -> bool {
        self.username_set && self.password_set
    }

    /// Get descriptive status message for display
    pub fn status_message(&self) -> String {
        match (self.has_credentials(), self.credentials_valid) {
            (false, _) => "Missing credentials - run 'auth setup' to configure".to_string(),
            (true, None) => "Credentials configured but not verified".to_string(),
            (true, Some(true)) => "Credentials configured and verified".to_string(),
            (true, Some(false)) => "Credentials configured but rejected by the server".to_string(),
        }
    }
}

/// Check current authentication status
pub fn get_auth_status() -> AuthStatus {
    AuthStatus {
        username_set: env::var(env_constants::USERNAME).is_ok(),
        password_set: env::var(env_constants::PASSWORD).is_ok(),
        dotenv_file_exists: Path::new(".env").exists(),
        credentials_valid: None,
    }
}

/// Check if credentials exist in environment variables
pub fn check_credentials() -> bool {
    env::var(env_constants::USERNAME).is_ok() && env::var(env_constants::PASSWORD).is_ok()
}

/// Prompt user for credentials interactively
pub fn prompt_credentials() -> AuthResult<Credentials> {
    print!("XNAT Username: ");
    io::stdout().flush().map_err(AuthError::CredentialStorage)?;

    let mut username = String::new();
    io::stdin()
        .read_line(&mut username)
        .map_err(AuthError::CredentialStorage)?;
    let username = username.trim().to_string();

    if username.is_empty() {
        return Err(AuthError::InvalidUsername {
            reason: "Username cannot be empty".to_string(),
        });
    }

    if !is_valid_username(&username) {
        return Err(AuthError::InvalidUsername {
            reason: "Username should be alphanumeric with optional dots, hyphens, or underscores"
                .to_string(),
        });
    }

    let password = rpassword::prompt_password("XNAT Password: ")
        .map_err(|e| AuthError::CredentialStorage(io::Error::new(io::ErrorKind::Other, e)))?;

    if password.is_empty() {
        return Err(AuthError::InvalidUsername {
            reason: "Password cannot be empty".to_string(),
        });
    }

    Ok(Credentials::new(username, password))
}

fn is_valid_username(username: &str) -> bool {
    if username.len() < auth::MIN_USERNAME_LENGTH || username.len() > auth::MAX_USERNAME_LENGTH {
        return false;
    }

    username
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == '_')
}

/// Save credentials to a .env file with secure permissions
///
/// Existing `XNAT_USER`/`XNAT_PASS` lines are replaced in place and every
/// other line is preserved.
pub fn save_credentials(env_path: &Path, credentials: &Credentials) -> AuthResult<()> {
    let mut existing_lines = Vec::new();
    let mut username_found = false;
    let mut password_found = false;

    if env_path.exists() {
        let reader = BufReader::new(File::open(env_path)?);

        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();

            if trimmed.starts_with(&format!("{}=", env_constants::USERNAME)) {
                existing_lines.push(format!(
                    "{}={}",
                    env_constants::USERNAME,
                    credentials.username
                ));
                username_found = true;
            } else if trimmed.starts_with(&format!("{}=", env_constants::PASSWORD)) {
                existing_lines.push(format!(
                    "{}={}",
                    env_constants::PASSWORD,
                    credentials.password
                ));
                password_found = true;
            } else {
                existing_lines.push(line);
            }
        }
    }

    if !username_found {
        existing_lines.push(format!(
            "{}={}",
            env_constants::USERNAME,
            credentials.username
        ));
    }
    if !password_found {
        existing_lines.push(format!(
            "{}={}",
            env_constants::PASSWORD,
            credentials.password
        ));
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(env_path)?;

    for line in existing_lines {
        writeln!(file, "{}", line)?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = file.metadata()?.permissions();
        perms.set_mode(auth::ENV_FILE_PERMISSIONS);
        file.set_permissions(perms)?;
    }

    tracing::info!("Credentials saved to {}", env_path.display());
    Ok(())
}

/// Verify credentials by opening and closing a session on the server
pub async fn verify_credentials(
    server: &str,
    credentials: &Credentials,
    config: &ClientConfig,
) -> AuthResult<bool> {
    println!("Verifying credentials with {}...", server);

    match Session::open(server, credentials.clone(), config.clone()).await {
        Ok(session) => {
            session.close().await;
            println!("Credentials verified successfully!");
            Ok(true)
        }
        Err(e @ AuthError::Http(_)) => Err(e),
        Err(e) if e.is_transient() => Err(e),
        Err(e) => {
            println!("Credential verification failed: {}", e);
            Ok(false)
        }
    }
}

/// Interactive credential setup workflow
pub async fn setup_credentials(server: &str, config: &ClientConfig) -> AuthResult<()> {
    println!("XNAT Authentication Setup");
    println!("=========================");
    println!();
    println!("Your credentials will be stored in a .env file in the current directory.");
    println!();

    let status = get_auth_status();
    if status.has_credentials() {
        println!("Warning: Credentials are already configured.");
        print!("Do you want to update them? [y/N]: ");
        io::stdout().flush().map_err(AuthError::CredentialStorage)?;

        let mut response = String::new();
        io::stdin()
            .read_line(&mut response)
            .map_err(AuthError::CredentialStorage)?;

        if !response.trim().to_lowercase().starts_with('y') {
            println!("Setup cancelled.");
            return Ok(());
        }
        println!();
    }

    let credentials = prompt_credentials()?;

    println!();
    save_credentials(Path::new(".env"), &credentials)?;

    println!();
    if verify_credentials(server, &credentials, config).await? {
        println!("Setup complete!");
    } else {
        println!("Setup failed. Please check your credentials and run 'auth setup' again.");
    }

    Ok(())
}

/// Show current authentication status, testing the credentials when present
pub async fn show_auth_status(server: &str, config: &ClientConfig) -> AuthResult<()> {
    let mut status = get_auth_status();

    println!("XNAT Authentication Status");
    println!("==========================");
    println!();
    println!("Server: {}", server);

    if let Ok(username) = env::var(env_constants::USERNAME) {
        println!("Username: {} (set)", username);
    } else {
        println!("Username: Not set");
    }
    println!(
        "Password: {}",
        if status.password_set { "Set" } else { "Not set" }
    );
    println!(
        ".env file: {}",
        if status.dotenv_file_exists {
            "Exists"
        } else {
            "Not found"
        }
    );
    println!();

    if let Ok(credentials) = Credentials::from_env() {
        status.credentials_valid = Some(verify_credentials(server, &credentials, config).await?);
        println!();
    }

    println!("Status: {}", status.status_message());
    Ok(())
}
