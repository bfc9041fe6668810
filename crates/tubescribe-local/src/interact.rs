//! UI steps that make the watch page request its transcript.
//!
//! Each step reports a [`StepOutcome`]; whether a failure aborts the acquisition is the
//! pipeline's call, not the step's.

use tokio::time::sleep;
use tubescribe_core::{AcquisitionConfig, PageSession, Result, StepOutcome};

async fn wait_and_click(session: &dyn PageSession, selector: &str, cfg: &AcquisitionConfig) -> Result<()> {
    session
        .wait_for_selector(selector, true, cfg.element_wait_timeout)
        .await?;
    session.click(selector).await?;
    sleep(cfg.after_click_delay).await;
    Ok(())
}

/// Step A: expand the description panel, trying the specific control first.
pub async fn expand_description(session: &dyn PageSession, cfg: &AcquisitionConfig) -> StepOutcome {
    let sel = &cfg.selectors;
    let primary_err = match wait_and_click(session, &sel.more_actions, cfg).await {
        Ok(()) => {
            tracing::info!("clicked description expander");
            return StepOutcome::Succeeded;
        }
        Err(e) => e,
    };
    tracing::warn!(error = %primary_err, "description expander not clickable; trying alternate selector");
    match wait_and_click(session, &sel.more_actions_alt, cfg).await {
        Ok(()) => {
            tracing::info!("clicked alternate description expander");
            StepOutcome::SucceededDegraded(format!("primary expander unavailable: {primary_err}"))
        }
        Err(e) => StepOutcome::Failed(format!(
            "description panel not expanded: primary: {primary_err}; alternate: {e}"
        )),
    }
}

/// Click that falls back to a script-driven `element.click()`. Returns whether the fallback was used.
async fn click_with_fallback(session: &dyn PageSession, selector: &str) -> Result<bool> {
    match session.click(selector).await {
        Ok(()) => Ok(false),
        Err(e) => {
            tracing::debug!(error = %e, "direct click failed; using script click");
            session.script_click(selector).await?;
            Ok(true)
        }
    }
}

/// Try once to find and click the transcript control. `Ok(None)` means "not on the page yet".
async fn try_open_transcript(session: &dyn PageSession, cfg: &AcquisitionConfig) -> Result<Option<bool>> {
    let sel = &cfg.selectors;
    session
        .wait_for_selector(&sel.any_button, false, cfg.element_wait_timeout)
        .await?;
    sleep(cfg.after_click_delay).await;

    if session.count(&sel.transcript_button).await? == 0 {
        return Ok(None);
    }
    session.scroll_into_view(&sel.transcript_button).await?;
    sleep(cfg.after_scroll_delay).await;
    let used_script = click_with_fallback(session, &sel.transcript_button).await?;
    Ok(Some(used_script))
}

/// Step B: open the transcript panel, bounded by `transcript_click_attempts`.
pub async fn open_transcript_panel(session: &dyn PageSession, cfg: &AcquisitionConfig) -> StepOutcome {
    let attempts = cfg.transcript_click_attempts.max(1);
    let mut last_reason = String::from("transcript button not found");

    for attempt in 1..=attempts {
        match try_open_transcript(session, cfg).await {
            Ok(Some(used_script)) => {
                tracing::info!(attempt, "clicked transcript button");
                if used_script {
                    return StepOutcome::SucceededDegraded(
                        "transcript button needed a script click".to_string(),
                    );
                }
                if attempt > 1 {
                    return StepOutcome::SucceededDegraded(format!(
                        "transcript button clicked on attempt {attempt}"
                    ));
                }
                return StepOutcome::Succeeded;
            }
            Ok(None) => {
                last_reason = "transcript button not found".to_string();
            }
            Err(e) => {
                last_reason = e.to_string();
            }
        }
        if attempt < attempts {
            tracing::info!(attempt, reason = %last_reason, "retrying transcript button");
            sleep(cfg.after_click_delay).await;
        }
    }

    StepOutcome::Failed(format!(
        "transcript panel not opened after {attempts} attempts: {last_reason}"
    ))
}
