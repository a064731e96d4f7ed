use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::campaign::{CampaignService, ServiceSettings};
use crate::config::Config;
use crate::notify::broadcast::Broadcaster;
use crate::notify::{mailer_from_config, EmailNotifier, LogNotifier, Mailer, SignatureNotifier};
use crate::payments::StripeClient;
use crate::progress::{ProgressSettings, ProgressTracker};
use crate::store::{open_backend, Backend};
use crate::tracking::LogTracker;

/// Everything the CLI and the API need, wired from one config.
#[derive(Clone)]
pub struct CampaignApp {
    pub config: Arc<Config>,
    pub backend: Backend,
    pub service: CampaignService,
    mailer: Arc<dyn Mailer>,
}

impl CampaignApp {
    pub fn from_config(config: Config) -> Result<Self> {
        let backend = open_backend(&config.storage)?;
        info!(backend = ?config.storage.backend, "campaign store opened");
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: Config, backend: Backend) -> Self {
        let mailer = mailer_from_config(&config.notifications);
        let notifier: Arc<dyn SignatureNotifier> =
            if config.notifications.resend_api_key.trim().is_empty() {
                Arc::new(LogNotifier)
            } else {
                Arc::new(EmailNotifier::new(mailer.clone(), &config.notifications))
            };
        let service = CampaignService::new(backend.store.clone(), backend.feed.clone())
            .with_notifier(notifier)
            .with_tracker(Arc::new(LogTracker))
            .with_settings(ServiceSettings::from_config(&config));
        Self {
            config: Arc::new(config),
            backend,
            service,
            mailer,
        }
    }

    pub fn progress_tracker(&self) -> ProgressTracker {
        ProgressTracker::new(self.service.clone(), ProgressSettings::from_config(&self.config))
    }

    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(
            self.backend.store.clone(),
            self.mailer.clone(),
            &self.config.notifications,
        )
    }

    pub fn payments(&self) -> StripeClient {
        StripeClient::new(&self.config.payments)
    }
}
