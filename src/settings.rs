use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatehouseSettings {
    pub application: ApplicationSettings,
    pub session: SessionSettings,
    pub security: SecuritySettings,
    pub passkeys: PasskeySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Public base URL used when building confirmation and reset links
    pub public_origin: String,
    pub cors_origins: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Key material for the encrypted session cookie; generated when empty
    pub session_secret: String,
    pub session_duration_hours: u64,
    /// Cookie lifetime when the caller asks to be remembered
    pub remember_duration_hours: u64,
    pub cookie_secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Consecutive failures before an account locks
    pub lockout_threshold: u32,
    pub lockout_duration_minutes: u64,
    /// Lifetime of emailed verification codes
    pub code_ttl_minutes: u64,
    /// Lifetime of passkey enrollment tokens
    pub enrollment_token_ttl_minutes: u64,
    /// Lifetime of confirmation and password-reset link tokens
    pub link_token_ttl_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasskeySettings {
    pub rp_id: String,
    pub rp_name: String,
    pub rp_origin: String,
    pub timeout_seconds: u64,
    pub user_verification: String,
    pub authenticator_attachment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_origin: "http://localhost:8080".to_string(),
            cors_origins: "http://localhost:3000,http://localhost:8080".to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_secret: String::new(), // Will be generated if empty
            session_duration_hours: 2,
            remember_duration_hours: 336, // 14 days
            cookie_secure: true,
        }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            lockout_threshold: 5,
            lockout_duration_minutes: 5,
            code_ttl_minutes: 10,
            enrollment_token_ttl_minutes: 15,
            link_token_ttl_hours: 24,
        }
    }
}

impl Default for PasskeySettings {
    fn default() -> Self {
        Self {
            rp_id: "localhost".to_string(),
            rp_name: "Gatehouse".to_string(),
            rp_origin: "http://localhost:8080".to_string(),
            timeout_seconds: 60,
            user_verification: "preferred".to_string(),
            authenticator_attachment: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl GatehouseSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Environment initialization fails
    /// - Settings file cannot be read or parsed
    /// - TOML parsing fails
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::initialize_environment()?;

        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);

        Ok(settings)
    }

    /// Initialize environment variables and logging
    ///
    /// # Errors
    ///
    /// Returns an error if logger initialization fails
    fn initialize_environment() -> Result<(), Box<dyn std::error::Error>> {
        Self::load_env_file();
        env_logger::try_init()?;
        Ok(())
    }

    /// Load base settings from Settings.toml or use defaults
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading)
    /// 2. Settings.toml in `GATEHOUSE_SECRETS_DIR` (if set and present)
    /// 3. Settings.toml in the current directory (if present)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file cannot be read or parsed
    fn load_base_settings() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::default();

        let default_config_path = std::path::PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            let toml_content = fs::read_to_string(&default_config_path)?;
            settings = basic_toml::from_str(&toml_content)?;
            println!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(secrets_dir) = std::env::var("GATEHOUSE_SECRETS_DIR") {
            let secrets_path = std::path::Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                let secrets_toml_content = fs::read_to_string(&secrets_path)?;
                let secrets_settings: Self = basic_toml::from_str(&secrets_toml_content)?;
                println!("✓ Overriding settings from {}", secrets_path.display());
                settings = secrets_settings;
            }
        }

        Ok(settings)
    }

    /// Apply environment variable overrides to settings
    fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_session_env_overrides(&mut settings.session);
        Self::apply_security_env_overrides(&mut settings.security);
        Self::apply_passkey_env_overrides(&mut settings.passkeys);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app_settings.port = port;
            }
        }
        if let Ok(public_origin) = std::env::var("PUBLIC_ORIGIN") {
            app_settings.public_origin = public_origin;
        }
        if let Ok(cors_origins) = std::env::var("CORS_ORIGINS") {
            app_settings.cors_origins = cors_origins;
        }
    }

    /// Apply environment overrides for session settings
    pub fn apply_session_env_overrides(session_settings: &mut SessionSettings) {
        Self::apply_numeric_env_override(
            "SESSION_DURATION_HOURS",
            &mut session_settings.session_duration_hours,
        );
        Self::apply_numeric_env_override(
            "REMEMBER_DURATION_HOURS",
            &mut session_settings.remember_duration_hours,
        );
        if let Ok(cookie_secure_str) = std::env::var("COOKIE_SECURE") {
            if let Ok(cookie_secure) = cookie_secure_str.parse::<bool>() {
                session_settings.cookie_secure = cookie_secure;
            }
        }

        Self::handle_session_secret_override(session_settings);
    }

    /// Apply environment overrides for security settings
    pub fn apply_security_env_overrides(security_settings: &mut SecuritySettings) {
        if let Ok(threshold_str) = std::env::var("LOCKOUT_THRESHOLD") {
            if let Ok(threshold) = threshold_str.parse::<u32>() {
                security_settings.lockout_threshold = threshold;
            }
        }
        Self::apply_numeric_env_override(
            "LOCKOUT_DURATION_MINUTES",
            &mut security_settings.lockout_duration_minutes,
        );
        Self::apply_numeric_env_override(
            "CODE_TTL_MINUTES",
            &mut security_settings.code_ttl_minutes,
        );
        Self::apply_numeric_env_override(
            "ENROLLMENT_TOKEN_TTL_MINUTES",
            &mut security_settings.enrollment_token_ttl_minutes,
        );
        Self::apply_numeric_env_override(
            "LINK_TOKEN_TTL_HOURS",
            &mut security_settings.link_token_ttl_hours,
        );
    }

    fn apply_passkey_env_overrides(passkey_settings: &mut PasskeySettings) {
        if let Ok(rp_id) = std::env::var("PASSKEY_RP_ID") {
            passkey_settings.rp_id = rp_id;
        }
        if let Ok(rp_name) = std::env::var("PASSKEY_RP_NAME") {
            passkey_settings.rp_name = rp_name;
        }
        if let Ok(rp_origin) = std::env::var("PASSKEY_RP_ORIGIN") {
            passkey_settings.rp_origin = rp_origin;
        }
        Self::apply_numeric_env_override(
            "PASSKEY_TIMEOUT_SECONDS",
            &mut passkey_settings.timeout_seconds,
        );
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    /// Helper function to apply numeric environment variable overrides
    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    /// Helper function to handle session secret environment override and generation
    fn handle_session_secret_override(session_settings: &mut SessionSettings) {
        let env_secret_set = std::env::var("SESSION_SECRET").is_ok_and(|secret| {
            if secret.is_empty() {
                false
            } else {
                session_settings.session_secret = secret;
                true
            }
        });

        if !env_secret_set && session_settings.session_secret.is_empty() {
            session_settings.session_secret = Self::generate_random_session_secret();
            Self::warn_about_generated_secret();
        }
    }

    /// Generate a cryptographically secure random session secret
    ///
    /// 32 bytes (256 bits) of entropy for AES-256 compatibility
    fn generate_random_session_secret() -> String {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        general_purpose::STANDARD.encode(secret)
    }

    fn warn_about_generated_secret() {
        eprintln!("⚠️  WARNING: Using auto-generated session secret");
        eprintln!("🔒 For production use, set the SESSION_SECRET environment variable");
        eprintln!("   or configure session_secret in Settings.toml");
        eprintln!("💡 Sessions will not survive a restart unless explicitly configured");
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Get CORS origins as a vector of strings
    #[must_use]
    pub fn get_cors_origins(&self) -> Vec<String> {
        self.application
            .cors_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clean_env_vars() {
        std::env::remove_var("SESSION_SECRET");
        std::env::remove_var("SESSION_DURATION_HOURS");
        std::env::remove_var("LOCKOUT_THRESHOLD");
        std::env::remove_var("CODE_TTL_MINUTES");
        std::env::remove_var("GATEHOUSE_SECRETS_DIR");
    }

    #[test]
    fn default_settings_are_sane() {
        let settings = GatehouseSettings::default();
        assert_eq!(settings.security.lockout_threshold, 5);
        assert_eq!(settings.security.code_ttl_minutes, 10);
        assert_eq!(settings.passkeys.rp_id, "localhost");
        assert_eq!(settings.session.session_secret, "");
    }

    #[test]
    #[serial]
    fn session_secret_env_override() {
        clean_env_vars();

        let mut session_settings = SessionSettings {
            session_secret: "default-secret".to_string(),
            ..SessionSettings::default()
        };

        std::env::set_var("SESSION_SECRET", "env-override-secret");
        GatehouseSettings::apply_session_env_overrides(&mut session_settings);
        assert_eq!(session_settings.session_secret, "env-override-secret");

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn session_secret_auto_generation() {
        clean_env_vars();

        let mut session_settings = SessionSettings {
            session_secret: String::new(),
            ..SessionSettings::default()
        };
        GatehouseSettings::apply_session_env_overrides(&mut session_settings);

        assert!(!session_settings.session_secret.is_empty());
        assert!(session_settings.session_secret.len() > 40); // Base64 encoded 32 bytes

        let mut second = SessionSettings {
            session_secret: String::new(),
            ..SessionSettings::default()
        };
        GatehouseSettings::apply_session_env_overrides(&mut second);
        assert_ne!(session_settings.session_secret, second.session_secret);

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn security_env_overrides() {
        clean_env_vars();

        let mut security = SecuritySettings::default();
        std::env::set_var("LOCKOUT_THRESHOLD", "3");
        std::env::set_var("CODE_TTL_MINUTES", "2");

        GatehouseSettings::apply_security_env_overrides(&mut security);
        assert_eq!(security.lockout_threshold, 3);
        assert_eq!(security.code_ttl_minutes, 2);
        assert_eq!(security.lockout_duration_minutes, 5); // untouched

        clean_env_vars();
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let mut settings = GatehouseSettings::default();
        settings.application.cors_origins = "http://a.test, http://b.test".to_string();
        assert_eq!(
            settings.get_cors_origins(),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }
}
