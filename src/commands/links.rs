//! Manual link and alias administration

use crate::error::{Error, Result};
use crate::store::{Link, LinkStore, SaveOutcome};
use crate::LANGUAGE_NONE;
use tracing::info;

/// Fields to set on one link. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct LinkEdit {
    pub loc: Option<String>,
    pub language: Option<String>,
    pub subtype: Option<String>,
    pub lastmod: Option<i64>,
    /// Pins the status against resynchronization
    pub status: Option<bool>,
    /// Pins the priority against resynchronization
    pub priority: Option<f64>,
    /// Return status and priority to the configured defaults on the next rebuild
    pub reset_overrides: bool,
}

/// Create or update a link by hand
pub async fn cmd_set_link(
    store: &LinkStore,
    link_type: &str,
    id: i64,
    edit: LinkEdit,
) -> Result<(Link, SaveOutcome)> {
    let mut link = match store.load(link_type, id).await? {
        Some(link) => link,
        None => {
            let loc = edit.loc.clone().ok_or_else(|| {
                Error::Config(format!(
                    "Link {}:{} does not exist; --loc is required to create it",
                    link_type, id
                ))
            })?;
            Link::new(link_type, id, loc)
        }
    };

    if let Some(loc) = edit.loc {
        link.loc = loc;
    }
    if let Some(language) = edit.language {
        link.language = language;
    }
    if let Some(subtype) = edit.subtype {
        link.subtype = subtype;
    }
    if let Some(lastmod) = edit.lastmod {
        link.record_modification(lastmod);
    }
    if edit.reset_overrides {
        link.status_override = false;
        link.priority_override = false;
    }
    if let Some(status) = edit.status {
        link.status = status;
        link.status_override = true;
    }
    if let Some(priority) = edit.priority {
        link.priority = priority;
        link.priority_override = true;
    }

    let outcome = store.save(&mut link).await?;
    info!(link_type, id, ?outcome, "Saved link");
    Ok((link, outcome))
}

pub async fn cmd_delete_link(store: &LinkStore, link_type: &str, id: i64) -> Result<()> {
    if store.delete(link_type, id).await? == 0 {
        return Err(Error::LinkNotFound {
            link_type: link_type.to_string(),
            id,
        });
    }
    Ok(())
}

/// Point `source` at a public `alias`, replacing earlier aliases for the language
pub async fn cmd_set_alias(
    store: &LinkStore,
    source: &str,
    alias: &str,
    language: Option<&str>,
) -> Result<()> {
    let language = language.unwrap_or(LANGUAGE_NONE);
    store.delete_aliases(source, language).await?;
    store.save_alias(source, alias, language).await?;
    store.notify_regeneration_needed().await?;
    info!(source, alias, language, "Saved alias");
    Ok(())
}

pub fn print_link(link: &Link, outcome: SaveOutcome) {
    let verb = match outcome {
        SaveOutcome::Inserted => "Created",
        SaveOutcome::Updated => "Updated",
    };
    println!("✓ {} link {}:{}", verb, link.link_type, link.id);
    println!("  Location: {}", link.loc);
    println!("  Language: {}", link.language);
    println!(
        "  Visible: {}",
        if link.is_visible() { "yes" } else { "no" }
    );
    println!(
        "  Priority: {:.1}{}",
        link.priority,
        if link.priority_override { " (pinned)" } else { "" }
    );
}
