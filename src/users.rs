//! User-profile management.
//!
//! Profiles carry per-user calibrations and settings on the device. This
//! module covers CRUD on profiles, selecting the active profile, a one-shot
//! listing, and live change notifications via the user feed hub.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::events::{UserEvent, UserFeed};
use crate::hub::{Feed, FeedHub, SubscriptionKey};
use crate::proto::{ConfigRequest, ConfigResponse, FeedRequest, UserOperation};
use crate::session::SessionManager;

/// Errors from creating a user profile.
#[derive(Debug, Error)]
pub enum UsersError {
    #[error("username must not be empty")]
    EmptyUsername,
    /// The device rejected the operation or the request failed.
    #[error("the device did not create the profile")]
    Failed,
}

/// User-profile accessor bound to one session.
pub struct Users {
    session: SessionManager,
    changes: Arc<FeedHub<UserFeed>>,
}

impl Users {
    pub(crate) fn new(session: SessionManager, changes: Arc<FeedHub<UserFeed>>) -> Self {
        Self { session, changes }
    }

    /// Registers a callback for live profile-change notifications.
    pub fn subscribe_changes<C>(&self, key: SubscriptionKey, callback: C)
    where
        C: Fn(&UserEvent) + Send + Sync + 'static,
    {
        self.changes.subscribe(key, callback);
    }

    /// Removes a profile-change registration.
    pub fn unsubscribe_changes(&self, key: SubscriptionKey) {
        self.changes.unsubscribe(key);
    }

    /// Creates a new profile and returns the device-assigned record.
    pub async fn create(&self, username: &str) -> Result<UserEvent, UsersError> {
        if username.trim().is_empty() {
            return Err(UsersError::EmptyUsername);
        }
        match self.manage(0, username, UserOperation::Create).await {
            Some((true, Some(user))) => Ok(user),
            _ => Err(UsersError::Failed),
        }
    }

    /// Renames an existing profile.
    pub async fn rename(&self, user_id: i32, username: &str) -> bool {
        if username.trim().is_empty() {
            return false;
        }
        matches!(
            self.manage(user_id, username, UserOperation::Update).await,
            Some((true, _))
        )
    }

    /// Deletes a profile together with its calibrations and settings.
    pub async fn delete(&self, user_id: i32) -> bool {
        matches!(
            self.manage(user_id, "", UserOperation::Delete).await,
            Some((true, _))
        )
    }

    /// Makes a profile the active one.
    pub async fn activate(&self, user_id: i32) -> bool {
        matches!(
            self.manage(user_id, "", UserOperation::Select).await,
            Some((true, _))
        )
    }

    /// Fetches the current profile list.
    ///
    /// Returns an empty list when not connected or when the request fails.
    pub async fn all(&self) -> Vec<UserEvent> {
        let Ok(transport) = self.session.current_transport() else {
            return Vec::new();
        };
        let mut stream = match transport
            .open_feed(FeedRequest::Users { stay_open: false })
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "failed to open the profile listing stream");
                return Vec::new();
            }
        };

        let mut users = Vec::new();
        loop {
            match stream.next().await {
                Ok(Some(item)) => {
                    if let Some(user) = UserFeed::normalize(item) {
                        users.push(user);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "profile listing stream failed");
                    break;
                }
            }
        }
        users
    }

    async fn manage(
        &self,
        user_id: i32,
        username: &str,
        operation: UserOperation,
    ) -> Option<(bool, Option<UserEvent>)> {
        let transport = self.session.current_transport().ok()?;
        let request = ConfigRequest::ManageUser {
            user_id,
            username: username.to_string(),
            operation,
        };
        match transport.call(request).await {
            Ok(ConfigResponse::UserProfile { success, user }) => Some((
                success,
                user.map(|record| UserEvent {
                    user_id: record.user_id,
                    user_name: record.username,
                    active: record.is_active,
                    user_guid: crate::proto::uuid_from_bytes(&record.uid),
                }),
            )),
            Ok(other) => {
                warn!(?other, ?operation, "unexpected response to profile request");
                None
            }
            Err(err) => {
                warn!(error = %err, ?operation, "profile request failed");
                None
            }
        }
    }
}
