use std::sync::Arc;
use tutorhub_core::{MailTransport, Settings};
use tutorhub_store::Database;

use crate::auth::{LoginThrottle, TokenService};
use crate::mailer::{LogMailer, Mailer, OutboxMailer};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub settings: Arc<Settings>,
    pub tokens: Arc<TokenService>,
    pub mailer: Arc<dyn Mailer>,
    pub throttle: Arc<LoginThrottle>,
}

impl AppState {
    /// Opens the configured store and mail transport.
    pub fn new(settings: Settings) -> tutorhub_core::Result<Self> {
        let db = Arc::new(Database::from_config(&settings.database)?);
        let mailer: Arc<dyn Mailer> = match settings.mail.transport {
            MailTransport::Log => Arc::new(LogMailer),
            MailTransport::Outbox => Arc::new(OutboxMailer::new()),
        };
        Ok(Self::with_parts(settings, db, mailer))
    }

    pub fn with_parts(settings: Settings, db: Arc<Database>, mailer: Arc<dyn Mailer>) -> Self {
        let tokens = Arc::new(TokenService::from_settings(&settings));
        let throttle = Arc::new(LoginThrottle::new(
            settings.security.login_attempts_per_minute,
        ));
        Self {
            db,
            settings: Arc::new(settings),
            tokens,
            mailer,
            throttle,
        }
    }
}
