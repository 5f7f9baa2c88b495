//! Refresh orchestrator.
//!
//! Decides, in order:
//! 1. fresh `PARTICIPATING`/`NOT_PARTICIPATING` cookies: answer locally, no I/O
//! 2. a redirect was deferred earlier: redirect now if allowed
//! 3. otherwise, on browsers that send third-party cookies, read from the operator and
//!    probe 3PC support
//! 4. fall back to a redirect to the operator, or defer it with `REDIRECT_NEEDED`
//!
//! The return from the operator is handled by
//! [`handle_after_boomerang_redirect`](SyncEngine::handle_after_boomerang_redirect).

use crate::engine::cookies::CookieCacheEntry;
use crate::engine::endpoints::{params, query_param, redirect, strip_query_params, with_query_param};
use crate::engine::engine::{Outcome, RefreshResult, SyncEngine};
use crate::engine::events::ShowPromptOption;
use crate::engine::status::Status;
use crate::engine::user_agent::is_browser_known_to_support_3pc;
use crate::errors::SyncError;
use crate::model::{IdsAndOptionalPreferences, IdsAndPreferences};

impl SyncEngine {
    /// Makes sure the local cookies are up to date, contacting the operator if they aren't.
    ///
    /// Once a result is known, the prompt is shown according to `show_prompt`.
    pub async fn refresh_ids_and_preferences(
        &self,
        show_prompt: ShowPromptOption,
    ) -> Result<Outcome<RefreshResult>, SyncError> {
        log::debug!("refreshIdsAndPreferences {}", show_prompt.as_str());

        let initial = self.cookies.read();
        let result = match self.process_refresh(&initial, show_prompt).await? {
            Outcome::Completed(result) => result,
            Outcome::Redirected { url } => return Ok(Outcome::Redirected { url }),
        };
        log::debug!("refreshIdsAndPreferences return {:?}", result);

        if let Outcome::Redirected { url } = self.update_data_with_prompt(&result, show_prompt).await? {
            return Ok(Outcome::Redirected { url });
        }

        // The prompt may have written or opted out since the result was resolved
        self.set_status(self.cookies.read().status());
        Ok(Outcome::Completed(result))
    }

    async fn process_refresh(
        &self,
        initial: &CookieCacheEntry,
        show_prompt: ShowPromptOption,
    ) -> Result<Outcome<RefreshResult>, SyncError> {
        let status = initial.status();

        if status == Status::RedirectNeeded {
            log::info!("Redirect previously deferred");
            if self.config.trigger_redirect_if_needed {
                return self.redirect_to_read(show_prompt).await;
            }
            return Ok(Outcome::Completed(RefreshResult::new(status, None)));
        }

        if initial.is_fresh() && status != Status::Unknown {
            log::info!("Cookie found: YES");
            if status == Status::NotParticipating {
                log::info!("User is not participating");
            }
            return Ok(Outcome::Completed(RefreshResult::new(status, Some(initial.data()))));
        }

        log::info!("Cookie found: NO");

        if is_browser_known_to_support_3pc(&self.config.user_agent) {
            log::info!("Browser known to support 3PC: YES");

            log::info!("Attempt to read from JSON");
            let operator_data = self.proxy.read().await?.body;
            let persisted = operator_data.persisted_identifiers();

            if !persisted.is_empty() && operator_data.preferences.is_some() {
                log::debug!("Operator returned id & prefs: YES");
                self.set_third_party_cookies_supported(true);

                // A direct REST answer needs no verification
                self.cookies
                    .save(Some(persisted.as_slice()), operator_data.preferences.as_ref())?;
                self.notify_if_changed(initial.consent(), operator_data.consent()).await;

                return Ok(Outcome::Completed(RefreshResult::new(
                    Status::Participating,
                    Some(operator_data),
                )));
            }
            log::info!("Operator returned id & prefs: NO");

            log::info!("Verify 3PC on operator");
            if self.proxy.verify_3pc().await? {
                log::debug!("3PC verification OK: YES");
                self.set_third_party_cookies_supported(true);
                self.set_unpersisted_ids(operator_data.identifiers.clone());

                return Ok(Outcome::Completed(RefreshResult::new(
                    Status::Unknown,
                    Some(IdsAndOptionalPreferences {
                        identifiers: operator_data.identifiers,
                        preferences: None,
                    }),
                )));
            }

            log::info!("3PC verification OK: NO");
            self.set_third_party_cookies_supported(false);
            log::info!("Fallback to JS redirect");
        } else {
            log::info!("Browser known to support 3PC: NO");
            self.set_third_party_cookies_supported(false);
            log::info!("JS redirect");
        }

        if self.config.trigger_redirect_if_needed {
            return self.redirect_to_read(show_prompt).await;
        }

        log::info!("Deferring redirect to later, in agreement with options");
        self.cookies.save_redirect_needed()?;
        Ok(Outcome::Completed(RefreshResult::new(Status::RedirectNeeded, None)))
    }

    /// Navigates to the operator read endpoint. The prompt option rides on the return URL.
    async fn redirect_to_read<T>(&self, show_prompt: ShowPromptOption) -> Result<Outcome<T>, SyncError> {
        log::info!("Redirect to operator");

        let boomerang = with_query_param(&self.navigator.current_url(), params::SHOW_PROMPT, show_prompt.as_str());
        let url = self
            .redirect_through(redirect::READ, &[(params::RETURN_URL, boomerang.as_str())])
            .await?;
        Ok(Outcome::Redirected { url })
    }

    /// Processes the operator response attached to the page URL after a redirect.
    ///
    /// Returns `None` when the page was not loaded from the operator. A payload rejected by
    /// the verifier fails with [`SyncError::VerificationFailed`] and nothing is written.
    pub async fn handle_after_boomerang_redirect(&self) -> Result<Option<Outcome<RefreshResult>>, SyncError> {
        let current = self.navigator.current_url();
        let payload = query_param(&current, params::PAF);
        let show_prompt = query_param(&current, params::SHOW_PROMPT);

        if payload.is_some() || show_prompt.is_some() {
            // Silent replace, no extra history entry
            self.navigator
                .replace_url(&strip_query_params(&current, &[params::PAF, params::SHOW_PROMPT]));
        }

        let initial = self.cookies.read();
        log::info!("Redirected from operator: {}", if payload.is_some() { "YES" } else { "NO" });

        let Some(payload) = payload else {
            return Ok(None);
        };

        // Being redirected back means 3PC are not available
        self.set_third_party_cookies_supported(false);

        let operator_data = self
            .proxy
            .verify_read(&payload)
            .await?
            .ok_or(SyncError::VerificationFailed)?
            .body;
        log::debug!("Operator data after redirect {:?}", operator_data);

        // Write and delete redirects come back without a prompt option
        let show_prompt = match show_prompt {
            Some(raw) => raw.parse::<ShowPromptOption>().unwrap_or_else(|e| {
                log::warn!("Ignoring prompt option: {}", e);
                ShowPromptOption::DoNotPrompt
            }),
            None => ShowPromptOption::DoNotPrompt,
        };

        let status = if operator_data.is_empty() {
            self.cookies.save_not_participating()?;
            log::info!("Deleted ids and preferences");
            Status::NotParticipating
        } else {
            let persisted = operator_data.persisted_identifiers();
            let has_persisted_id = !persisted.is_empty();
            let has_preferences = operator_data.preferences.is_some();

            self.cookies.save(
                has_persisted_id.then_some(persisted.as_slice()),
                operator_data.preferences.as_ref(),
            )?;
            self.notify_if_changed(initial.consent(), operator_data.consent()).await;

            if !has_persisted_id {
                self.set_unpersisted_ids(operator_data.identifiers.clone());
            }

            if has_persisted_id && has_preferences {
                Status::Participating
            } else {
                Status::Unknown
            }
        };

        let result = RefreshResult::new(status, Some(operator_data));
        if let Outcome::Redirected { url } = self.update_data_with_prompt(&result, show_prompt).await? {
            return Ok(Some(Outcome::Redirected { url }));
        }

        self.set_status(self.cookies.read().status());
        Ok(Some(Outcome::Completed(result)))
    }

    /// Shows the prompt if `show_prompt` asks for it, and applies the user's answer.
    async fn update_data_with_prompt(
        &self,
        result: &RefreshResult,
        show_prompt: ShowPromptOption,
    ) -> Result<Outcome<()>, SyncError> {
        log::debug!("showPrompt {} status {}", show_prompt.as_str(), result.status);

        if result.status == Status::RedirectNeeded {
            return Ok(Outcome::Completed(()));
        }

        let opt_in = if show_prompt.should_prompt(result.status) {
            match self.prompt.fire(()).wait().await {
                Ok(answer) => answer,
                Err(SyncError::EventSuperseded) => {
                    log::info!("Prompt superseded by a newer one");
                    return Ok(Outcome::Completed(()));
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let Some(opt_in) = opt_in else {
            // Dismissed or not shown: an unknown user is recorded as not participating,
            // existing choices are left alone
            if result.status == Status::Unknown {
                self.cookies.save_not_participating()?;
            }
            return Ok(Outcome::Completed(()));
        };

        let mut identifiers = result.data.as_ref().map(|d| d.identifiers.clone()).unwrap_or_default();
        if identifiers.is_empty() {
            // The prompt may be opened for an unknown user with no identifier yet
            identifiers = vec![self.get_new_id().await?];
        }

        Ok(self.update_ids_and_preferences(opt_in, identifiers).await?.map(|_| ()))
    }

    /// Identifiers and preferences from the cookies, if both are present and fresh.
    pub fn get_ids_and_preferences_from_cookies(&self) -> Option<IdsAndPreferences> {
        self.cookies.read().complete_data()
    }

    /// Local identifiers and preferences, refreshed from the operator when missing.
    ///
    /// Waits until the startup queue has been drained.
    pub async fn get_ids_and_preferences(&self) -> Result<Option<IdsAndPreferences>, SyncError> {
        self.queue.when_ready().await?;

        if let Some(data) = self.get_ids_and_preferences_from_cookies() {
            return Ok(Some(data));
        }

        let refreshed = self
            .refresh_ids_and_preferences(ShowPromptOption::PromptIfUnknownUser)
            .await?;
        Ok(refreshed
            .completed()
            .filter(|r| r.status == Status::Participating)
            .and_then(|r| r.data)
            .and_then(IdsAndOptionalPreferences::into_complete))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cookies::{CookieStore, IDENTIFIERS, LAST_REFRESH, PREFERENCES};
    use crate::engine::endpoints::json;
    use crate::engine::events::{Notification, SyncEvent};
    use crate::engine::status::{NOT_PARTICIPATING, REDIRECT_NEEDED};
    use crate::engine::testing::*;
    use crate::engine::navigator::Navigator;
    use http::Method;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    fn proxy(path: &str) -> String {
        format!("{}{}", PROXY, path)
    }

    fn script_read(h: &Harness, body: Value) {
        h.http.on_two_hop(Method::GET, json::READ, "/v1/ids-prefs", signed(body));
    }

    fn script_3pc(h: &Harness, ok: bool) {
        let answer = if ok { json!({ "3pc": true }) } else { json!({ "message": "no cookie" }) };
        h.http.on_two_hop(Method::GET, json::VERIFY_3PC, "/v1/3pc", answer);
    }

    fn script_redirect_read(h: &Harness) {
        h.http.on(Method::GET, &proxy(redirect::READ), 200, format!("{}/v1/redirect/get-ids-prefs?x=1", OPERATOR));
    }

    fn participating_body() -> Value {
        json!({ "identifiers": [identifier("abc", true)], "preferences": preferences(true) })
    }

    async fn record_notifications(h: &Harness) -> Arc<Mutex<Vec<Notification>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        h.engine
            .set_notification_handler(move |n| {
                s.lock().unwrap().push(n);
                async {}
            })
            .await;
        seen
    }

    #[tokio::test]
    async fn operator_read_populates_cookies_then_hits_locally() {
        let h = harness(CHROME_UA, true);
        script_read(&h, participating_body());
        let notifications = record_notifications(&h).await;

        let first = h
            .engine
            .refresh_ids_and_preferences(ShowPromptOption::DoNotPrompt)
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(first.status, Status::Participating);
        assert_eq!(h.engine.third_party_cookies_supported(), Some(true));
        assert!(h.cookies.get(LAST_REFRESH).is_some());
        assert_eq!(*notifications.lock().unwrap(), vec![Notification::PersonalizedContent]);
        let calls = h.http.request_count();

        // Fresh cache: same answer, no network
        let second = h
            .engine
            .refresh_ids_and_preferences(ShowPromptOption::DoNotPrompt)
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(second.status, Status::Participating);
        assert_eq!(second.data.as_ref().map(|d| &d.identifiers), first.data.as_ref().map(|d| &d.identifiers));
        assert_eq!(h.http.request_count(), calls);
        let third = h
            .engine
            .refresh_ids_and_preferences(ShowPromptOption::DoNotPrompt)
            .await
            .unwrap();
        assert_eq!(third, Outcome::Completed(second));
        assert_eq!(h.http.request_count(), calls);
        assert_eq!(h.engine.status(), Some(Status::Participating));
    }

    #[tokio::test]
    async fn fresh_opt_out_is_answered_locally() {
        let h = harness(SAFARI_UA, true);
        h.engine.cookies.save_not_participating().unwrap();

        let result = h
            .engine
            .refresh_ids_and_preferences(ShowPromptOption::PromptIfUnknownUser)
            .await
            .unwrap();
        assert_eq!(result.completed().map(|r| r.status), Some(Status::NotParticipating));
        assert_eq!(h.http.request_count(), 0);
    }

    #[tokio::test]
    async fn unknown_user_with_3pc_keeps_unpersisted_ids_in_memory() {
        let h = harness(CHROME_UA, true);
        script_read(&h, json!({ "identifiers": [identifier("new-id", false)] }));
        script_3pc(&h, true);

        let result = h
            .engine
            .refresh_ids_and_preferences(ShowPromptOption::DoNotPrompt)
            .await
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(result.status, Status::Unknown);
        assert_eq!(h.engine.unpersisted_ids().len(), 1);
        assert_eq!(h.engine.unpersisted_ids()[0].value, "new-id");
        assert_eq!(h.engine.third_party_cookies_supported(), Some(true));
        // No prompt shown: the unknown user is recorded as not participating, and the
        // minted id never reaches the cookies
        assert_eq!(h.cookies.get(IDENTIFIERS).as_deref(), Some(NOT_PARTICIPATING));
        assert_eq!(h.cookies.get(PREFERENCES).as_deref(), Some(NOT_PARTICIPATING));
    }

    #[tokio::test]
    async fn failed_probe_redirects_with_prompt_option() {
        let h = harness(CHROME_UA, true);
        script_read(&h, json!({ "identifiers": [identifier("new-id", false)] }));
        script_3pc(&h, false);
        script_redirect_read(&h);
        let mut events = h.engine.subscribe();

        let outcome = h
            .engine
            .refresh_ids_and_preferences(ShowPromptOption::DoPrompt)
            .await
            .unwrap();

        let Outcome::Redirected { url } = outcome else {
            panic!("expected a redirect");
        };
        assert_eq!(url.host_str(), Some("operator.test"));
        assert_eq!(h.navigator.last_redirect(), Some(url.clone()));
        assert!(h.engine.queue().is_stopped());
        assert_eq!(h.engine.third_party_cookies_supported(), Some(false));
        assert_eq!(events.try_recv().unwrap(), SyncEvent::Redirecting { url });

        let to_proxy = h
            .http
            .requests()
            .into_iter()
            .find(|r| r.url.path() == redirect::READ)
            .unwrap();
        let return_url = query_param(&to_proxy.url, params::RETURN_URL).unwrap();
        assert!(return_url.starts_with("https://site.test/article?id=1"));
        assert!(return_url.contains("paf_show_prompt=doPrompt"));
    }

    #[tokio::test]
    async fn browser_without_3pc_defers_redirect_when_not_allowed() {
        let h = harness(SAFARI_UA, false);

        let result = h
            .engine
            .refresh_ids_and_preferences(ShowPromptOption::PromptIfUnknownUser)
            .await
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(result, RefreshResult::new(Status::RedirectNeeded, None));
        assert_eq!(h.cookies.get(IDENTIFIERS).as_deref(), Some(REDIRECT_NEEDED));
        assert_eq!(h.cookies.get(PREFERENCES).as_deref(), Some(REDIRECT_NEEDED));
        assert_eq!(h.http.request_count(), 0);
        assert!(h.navigator.redirects().is_empty());

        // Still deferred on the next call, never re-decided locally
        let again = h
            .engine
            .refresh_ids_and_preferences(ShowPromptOption::PromptIfUnknownUser)
            .await
            .unwrap();
        assert_eq!(again.completed().map(|r| r.status), Some(Status::RedirectNeeded));
        assert_eq!(h.http.request_count(), 0);
    }

    #[tokio::test]
    async fn failed_probe_defers_redirect_when_not_allowed() {
        let h = harness(CHROME_UA, false);
        script_read(&h, json!({ "identifiers": [identifier("new-id", false)] }));
        script_3pc(&h, false);

        let result = h
            .engine
            .refresh_ids_and_preferences(ShowPromptOption::DoNotPrompt)
            .await
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(result, RefreshResult::new(Status::RedirectNeeded, None));
        assert_eq!(h.engine.third_party_cookies_supported(), Some(false));
        assert_eq!(h.cookies.get(IDENTIFIERS).as_deref(), Some(REDIRECT_NEEDED));
        assert_eq!(h.cookies.get(PREFERENCES).as_deref(), Some(REDIRECT_NEEDED));
        assert!(h.navigator.redirects().is_empty());
        assert!(h.http.called(Method::GET, &format!("{}/v1/3pc", OPERATOR)));
        assert!(h.engine.unpersisted_ids().is_empty());
    }

    #[tokio::test]
    async fn deferred_redirect_is_performed_when_allowed() {
        let h = harness(SAFARI_UA, true);
        h.engine.cookies.save_redirect_needed().unwrap();
        script_redirect_read(&h);

        let outcome = h
            .engine
            .refresh_ids_and_preferences(ShowPromptOption::DoNotPrompt)
            .await
            .unwrap();
        assert!(outcome.is_redirected());
        assert_eq!(h.navigator.redirects().len(), 1);
    }

    #[tokio::test]
    async fn proxy_failure_is_a_network_error() {
        let h = harness(CHROME_UA, true);
        h.http.on(Method::GET, &proxy(json::READ), 502, "bad gateway");

        let err = h
            .engine
            .refresh_ids_and_preferences(ShowPromptOption::DoNotPrompt)
            .await
            .unwrap_err();
        assert!(err.is_network());
        assert!(h.cookies.get(IDENTIFIERS).is_none());
    }

    fn returning(payload: &str, show_prompt: Option<&str>) -> Harness {
        let mut page = format!("{}&paf={}", PAGE, payload);
        if let Some(p) = show_prompt {
            page.push_str(&format!("&paf_show_prompt={}", p));
        }
        harness_at(SAFARI_UA, true, &page)
    }

    #[tokio::test]
    async fn boomerang_with_empty_payload_means_deleted() {
        let h = returning("signed-payload", None);
        let prefs: crate::model::Preferences = serde_json::from_value(preferences(true)).unwrap();
        let ids: Vec<crate::model::Identifier> = vec![serde_json::from_value(identifier("abc", true)).unwrap()];
        h.engine.cookies.save(Some(ids.as_slice()), Some(&prefs)).unwrap();
        h.http.on_json(
            Method::POST,
            &proxy(json::VERIFY_READ),
            signed(json!({ "identifiers": [] })),
        );

        let result = h.engine.start().await.unwrap().unwrap().completed().unwrap();

        assert_eq!(result.status, Status::NotParticipating);
        assert_eq!(h.cookies.get(IDENTIFIERS).as_deref(), Some(NOT_PARTICIPATING));
        assert_eq!(h.cookies.get(PREFERENCES).as_deref(), Some(NOT_PARTICIPATING));
        assert!(h.engine.get_ids_and_preferences_from_cookies().is_none());
        assert_eq!(h.navigator.current_url().as_str(), PAGE);
        assert_eq!(h.engine.third_party_cookies_supported(), Some(false));

        let verify = &h.http.requests()[0];
        assert_eq!(verify.body.as_deref(), Some("signed-payload"));
    }

    #[tokio::test]
    async fn boomerang_with_data_notifies_only_on_consent_change() {
        for (previous, expected) in [(None, 1), (Some(true), 0), (Some(false), 1)] {
            let h = returning("p", None);
            if let Some(consent) = previous {
                let prefs: crate::model::Preferences = serde_json::from_value(preferences(consent)).unwrap();
                h.engine.cookies.save(None, Some(&prefs)).unwrap();
            }
            h.http.on_json(Method::POST, &proxy(json::VERIFY_READ), signed(participating_body()));
            let notifications = record_notifications(&h).await;

            let result = h.engine.start().await.unwrap().unwrap().completed().unwrap();

            assert_eq!(result.status, Status::Participating);
            assert!(h.engine.get_ids_and_preferences_from_cookies().is_some());
            assert_eq!(notifications.lock().unwrap().len(), expected, "previous consent {:?}", previous);
        }
    }

    #[tokio::test]
    async fn rejected_payload_is_never_trusted() {
        let h = returning("forged", Some("doPrompt"));
        h.http.on(Method::POST, &proxy(json::VERIFY_READ), 200, "null");
        let ran = Arc::new(Mutex::new(false));
        let r = ran.clone();
        h.engine.queue().push(move || {
            *r.lock().unwrap() = true;
            Ok(())
        });

        let err = h.engine.start().await.unwrap_err();

        assert!(matches!(err, SyncError::VerificationFailed));
        assert!(h.cookies.get(IDENTIFIERS).is_none());
        assert!(h.cookies.get(LAST_REFRESH).is_none());
        // Buffered commands still run
        assert!(*ran.lock().unwrap());
        assert_eq!(h.navigator.current_url().as_str(), PAGE);
    }

    #[tokio::test]
    async fn payload_refused_by_verifier_is_not_retryable() {
        let h = returning("forged", None);
        h.http.on(Method::POST, &proxy(json::VERIFY_READ), 403, r#"{"message":"invalid signature"}"#);

        let err = h.engine.start().await.unwrap_err();

        assert!(matches!(err, SyncError::VerificationFailed));
        assert!(!err.is_network());
        assert!(h.cookies.get(IDENTIFIERS).is_none());
    }

    #[tokio::test]
    async fn verifier_outage_stays_a_network_error() {
        let h = returning("p", None);
        h.http.on(Method::POST, &proxy(json::VERIFY_READ), 503, "unavailable");

        let err = h.engine.start().await.unwrap_err();

        assert!(err.is_network());
        assert!(h.cookies.get(IDENTIFIERS).is_none());
    }

    #[tokio::test]
    async fn dismissed_prompt_records_opt_out_for_unknown_user() {
        let h = returning("p", Some("promptIfUnknownUser"));
        h.http.on_json(
            Method::POST,
            &proxy(json::VERIFY_READ),
            signed(json!({ "identifiers": [identifier("fresh", false)] })),
        );
        let prompted = Arc::new(Mutex::new(0));
        let p = prompted.clone();
        h.engine
            .set_prompt_handler(move || {
                *p.lock().unwrap() += 1;
                async { None }
            })
            .await;

        let result = h.engine.start().await.unwrap().unwrap().completed().unwrap();

        assert_eq!(result.status, Status::Unknown);
        assert_eq!(*prompted.lock().unwrap(), 1);
        assert_eq!(h.engine.unpersisted_ids()[0].value, "fresh");
        assert_eq!(h.cookies.get(PREFERENCES).as_deref(), Some(NOT_PARTICIPATING));
        // The result keeps the resolved status, the engine follows the opt-out
        assert_eq!(h.engine.status(), Some(Status::NotParticipating));
    }

    #[tokio::test]
    async fn prompt_answer_signs_and_writes_through_redirect() {
        let h = returning("p", Some("doPrompt"));
        h.http.on_json(
            Method::POST,
            &proxy(json::VERIFY_READ),
            signed(json!({ "identifiers": [identifier("fresh", false)] })),
        );
        h.http.on_json(Method::POST, &proxy(json::SIGN_PREFS), preferences(true));
        h.http.on(Method::GET, &proxy(redirect::WRITE), 200, format!("{}/v1/redirect/post-ids-prefs", OPERATOR));
        h.engine.set_prompt_handler(|| async { Some(true) }).await;

        let outcome = h.engine.start().await.unwrap().unwrap();

        assert!(outcome.is_redirected());
        let to_proxy = h
            .http
            .requests()
            .into_iter()
            .find(|r| r.url.path() == redirect::WRITE)
            .unwrap();
        let message: Value = serde_json::from_str(&query_param(&to_proxy.url, params::MESSAGE).unwrap()).unwrap();
        assert_eq!(message["identifiers"][0]["value"], "fresh");
        assert_eq!(message["preferences"]["data"]["use_browsing_for_personalization"], true);
        // The return URL no longer carries the operator payload
        let return_url = query_param(&to_proxy.url, params::RETURN_URL).unwrap();
        assert_eq!(return_url, PAGE);
    }

    #[tokio::test]
    async fn prompt_fired_before_handler_waits_for_it() {
        let h = Arc::new(harness(CHROME_UA, true));
        script_read(&h, json!({ "identifiers": [identifier("new-id", false)] }));
        script_3pc(&h, true);
        h.http.on_json(Method::POST, &proxy(json::SIGN_PREFS), preferences(false));
        h.http.on_json(
            Method::POST,
            &proxy(json::SIGN_WRITE),
            signed(json!({ "identifiers": [identifier("new-id", false)], "preferences": preferences(false) })),
        );
        h.http.on_two_hop(
            Method::POST,
            json::WRITE,
            "/v1/ids-prefs",
            signed(json!({ "identifiers": [identifier("new-id", true)], "preferences": preferences(false) })),
        );

        let task = {
            let h = h.clone();
            tokio::spawn(async move {
                h.engine
                    .refresh_ids_and_preferences(ShowPromptOption::PromptIfUnknownUser)
                    .await
            })
        };

        while h.engine.prompt.pending_len() == 0 {
            tokio::task::yield_now().await;
        }
        h.engine.set_prompt_handler(|| async { Some(false) }).await;

        let result = task.await.unwrap().unwrap().completed().unwrap();
        assert_eq!(result.status, Status::Unknown);
        assert_eq!(h.engine.get_ids_and_preferences_from_cookies().map(|d| d.preferences.consent()), Some(false));
        assert_eq!(h.engine.status(), Some(Status::Participating));
    }

    #[tokio::test]
    async fn status_events_follow_the_written_answer() {
        let h = harness(CHROME_UA, true);
        script_read(&h, json!({ "identifiers": [identifier("new-id", false)] }));
        script_3pc(&h, true);
        h.http.on_json(Method::POST, &proxy(json::SIGN_PREFS), preferences(true));
        h.http.on_json(
            Method::POST,
            &proxy(json::SIGN_WRITE),
            signed(json!({ "identifiers": [identifier("new-id", false)], "preferences": preferences(true) })),
        );
        h.http.on_two_hop(
            Method::POST,
            json::WRITE,
            "/v1/ids-prefs",
            signed(json!({ "identifiers": [identifier("new-id", true)], "preferences": preferences(true) })),
        );
        h.engine.set_prompt_handler(|| async { Some(true) }).await;
        let mut events = h.engine.subscribe();

        let result = h
            .engine
            .refresh_ids_and_preferences(ShowPromptOption::PromptIfUnknownUser)
            .await
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(result.status, Status::Unknown);
        assert_eq!(h.engine.status(), Some(Status::Participating));
        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::StatusChanged { status } = event {
                statuses.push(status);
            }
        }
        assert_eq!(statuses, vec![Status::Participating]);
    }

    #[tokio::test]
    async fn get_ids_and_preferences_waits_for_start() {
        let h = Arc::new(harness(CHROME_UA, true));
        script_read(&h, participating_body());

        let task = {
            let h = h.clone();
            tokio::spawn(async move { h.engine.get_ids_and_preferences().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(h.http.request_count(), 0);

        h.engine.start().await.unwrap();
        let data = task.await.unwrap().unwrap().unwrap();
        assert_eq!(data.identifiers[0].value, "abc");
        assert!(data.preferences.consent());
    }

    #[tokio::test]
    async fn waiters_are_released_when_start_redirects() {
        let h = Arc::new(returning("p", Some("doPrompt")));
        h.http.on_json(
            Method::POST,
            &proxy(json::VERIFY_READ),
            signed(json!({ "identifiers": [identifier("fresh", false)] })),
        );
        h.http.on_json(Method::POST, &proxy(json::SIGN_PREFS), preferences(true));
        h.http.on(Method::GET, &proxy(redirect::WRITE), 200, format!("{}/v1/redirect/post-ids-prefs", OPERATOR));
        h.engine.set_prompt_handler(|| async { Some(true) }).await;

        let task = {
            let h = h.clone();
            tokio::spawn(async move { h.engine.get_ids_and_preferences().await })
        };
        while h.engine.queue().is_empty() {
            tokio::task::yield_now().await;
        }

        let outcome = h.engine.start().await.unwrap().unwrap();

        assert!(outcome.is_redirected());
        assert!(h.engine.queue().is_stopped());
        assert!(matches!(task.await.unwrap(), Err(SyncError::QueueStopped)));
    }
}
