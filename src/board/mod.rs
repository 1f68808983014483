//! The bulletin board service.
//!
//! [`Board`] ties the database, the bulletin store, the crypto engine and the
//! notification queue together. Each submodule adds the operations of one
//! component: election lifecycle, access tokens, ballot intake and results.

use std::sync::Arc;

use crate::bulletin::BulletinStore;
use crate::config::Config;
use crate::crypto::CryptoEngine;
use crate::error::Result;
use crate::model::db::Database;
use crate::notify::{LogMailer, Mailer, NotificationQueue};

mod intake;
mod lifecycle;
mod results;
mod tokens;

struct Inner {
    config: Config,
    db: Database,
    bulletin: BulletinStore,
    crypto: Arc<dyn CryptoEngine>,
    notifications: NotificationQueue,
}

/// A running bulletin board. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Board {
    inner: Arc<Inner>,
}

impl Board {
    /// Set up storage and start the notification worker.
    ///
    /// When mail is disabled in the config, `mailer` is replaced by a
    /// [`LogMailer`].
    pub async fn launch(
        config: Config,
        crypto: Arc<dyn CryptoEngine>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self> {
        config.validate()?;
        let bulletin = BulletinStore::from_config(&config)?;
        let mailer = if config.mail_enabled() {
            mailer
        } else {
            info!("Mail disabled, notifications will only be logged");
            Arc::new(LogMailer)
        };
        let notifications = NotificationQueue::start(mailer);
        info!(
            "Board launched with {:?} storage and {}-of-{} trustees",
            config.storage(),
            config.trustee_threshold(),
            config.trustees()
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                db: Database::new(),
                bulletin,
                crypto,
                notifications,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn bulletin(&self) -> &BulletinStore {
        &self.inner.bulletin
    }

    pub fn crypto(&self) -> &dyn CryptoEngine {
        self.inner.crypto.as_ref()
    }

    fn notifications(&self) -> &NotificationQueue {
        &self.inner.notifications
    }

    /// Flush pending notifications and stop the worker.
    pub async fn shutdown(&self) {
        info!("Board shutting down, flushing notifications...");
        self.notifications().shutdown().await;
        info!("...board stopped");
    }
}
