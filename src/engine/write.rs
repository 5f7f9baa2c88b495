//! Write and delete orchestrators.
//!
//! Both clear or check the local cookies first, then either talk to the operator directly
//! (third-party cookies known to work) or redirect to it. The local clear and the remote
//! confirmation are not atomic: a failure in between leaves the user locally unknown until
//! the next refresh.

use crate::engine::endpoints::{params, redirect};
use crate::engine::engine::{Outcome, SyncEngine};
use crate::engine::status::Status;
use crate::errors::SyncError;
use crate::model::{Identifier, IdsAndOptionalPreferences, IdsAndPreferences, PostSignPreferencesRequest, Preferences, UnsignedPreferences};

impl SyncEngine {
    /// Writes identifiers and preferences to the operator.
    ///
    /// Returns what the operator stored, or [`Outcome::Redirected`] when the write is
    /// carried out through a redirect (signing then happens on the proxy).
    pub async fn write_ids_and_preferences(
        &self,
        input: IdsAndPreferences,
    ) -> Result<Outcome<IdsAndOptionalPreferences>, SyncError> {
        log::info!("Attempt to write: {:?} {:?}", input.identifiers, input.preferences);

        let previous_consent = self.cookies.read().consent();
        self.cookies.clear()?;

        // Only known if a refresh reached the operator earlier in this page
        if self.third_party_cookies_supported() == Some(true) {
            log::info!("3PC supported");

            let signed = self.proxy.sign_write(&input).await?;
            let operator_data = self.proxy.write(&signed).await?.body;

            let persisted = operator_data.persisted_identifiers();
            self.cookies.save(
                (!persisted.is_empty()).then_some(persisted.as_slice()),
                operator_data.preferences.as_ref(),
            )?;
            self.notify_if_changed(previous_consent, operator_data.consent()).await;
            self.set_status(self.cookies.read().status());

            log::info!("Finished {:?}", operator_data);
            return Ok(Outcome::Completed(operator_data));
        }

        log::info!("3PC not supported: redirect");
        let return_url = self.navigator.current_url();
        let message = serde_json::to_string(&input)?;
        let url = self
            .redirect_through(
                redirect::WRITE,
                &[(params::RETURN_URL, return_url.as_str()), (params::MESSAGE, message.as_str())],
            )
            .await?;
        Ok(Outcome::Redirected { url })
    }

    /// Deletes identifiers and preferences, locally and on the operator.
    pub async fn delete_ids_and_preferences(&self) -> Result<Outcome<()>, SyncError> {
        log::info!("Attempt to delete ids and preferences");

        if self.cookies.read().status() == Status::NotParticipating {
            log::info!("User is already not participating, nothing to clean");
            return Ok(Outcome::Completed(()));
        }

        if self.third_party_cookies_supported() == Some(true) {
            log::info!("3PC supported: deleting the ids and preferences");
            self.proxy.delete().await?;
            self.cookies.save_not_participating()?;
            self.set_status(Status::NotParticipating);
            log::info!("Deleted ids and preferences");
            return Ok(Outcome::Completed(()));
        }

        log::info!("3PC not supported: redirecting to delete ids and preferences");
        let return_url = self.navigator.current_url();
        let url = self
            .redirect_through(redirect::DELETE, &[(params::RETURN_URL, return_url.as_str())])
            .await?;
        Ok(Outcome::Redirected { url })
    }

    /// Signs preferences for the given identifiers.
    pub async fn sign_preferences(&self, input: &PostSignPreferencesRequest) -> Result<Preferences, SyncError> {
        self.proxy.sign_preferences(input).await
    }

    /// Gets a new random identifier, signed by the operator but not persisted.
    pub async fn get_new_id(&self) -> Result<Identifier, SyncError> {
        self.proxy.new_id().await
    }

    /// Signs the opt-in value and writes it with `identifiers`.
    pub async fn update_ids_and_preferences(
        &self,
        opt_in: bool,
        identifiers: Vec<Identifier>,
    ) -> Result<Outcome<IdsAndOptionalPreferences>, SyncError> {
        let preferences = self
            .sign_preferences(&PostSignPreferencesRequest {
                identifiers: identifiers.clone(),
                unsigned_preferences: UnsignedPreferences::new(opt_in),
            })
            .await?;

        self.write_ids_and_preferences(IdsAndPreferences { identifiers, preferences }).await
    }
}
