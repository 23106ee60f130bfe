//! Local-network advertisement record.
//!
//! A machine that can serve its installed OS image to peers publishes an
//! Avahi service file. Discovery tooling reads two TXT fields from it: the
//! OSTree path the image is served under, and the timestamp of the commit
//! currently being served.
//!
//! ```text
//! <service-group>
//!   <name replace-wildcards="yes">osupdate image source on %h</name>
//!   <service>
//!     <type>_osupdate_updater._tcp</type>
//!     <port>43381</port>
//!     <txt-record>osupdate_txt_version=1</txt-record>
//!     <txt-record>osupdate_ostree_path=...</txt-record>
//!     <txt-record>osupdate_head_commit_timestamp=...</txt-record>
//!   </service>
//! </service-group>
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::fs::save_or_delete;

/// DNS-SD service type the record is published under.
pub const SERVICE_TYPE: &str = "_osupdate_updater._tcp";

/// File name of the record inside the advertisement directory.
pub const SERVICE_FILE_NAME: &str = "osupdate-updater.service";

/// Default Avahi service directory.
pub const DEFAULT_SERVICE_DIR: &str = "/etc/avahi/services";

/// Default port the image is served on.
pub const DEFAULT_PORT: u16 = 43381;

/// TXT key carrying the record format version.
pub const TXT_VERSION_KEY: &str = "osupdate_txt_version";

/// TXT key carrying the OSTree path of the served image.
pub const TXT_OSTREE_PATH_KEY: &str = "osupdate_ostree_path";

/// TXT key carrying the timestamp of the served commit.
pub const TXT_HEAD_COMMIT_TIMESTAMP_KEY: &str = "osupdate_head_commit_timestamp";

/// Errors from writing or removing the record.
#[derive(Debug, Error)]
pub enum AdvertiseError {
    #[error("Invalid OSTree path for advertisement: {0:?}")]
    InvalidOstreePath(String),

    #[error("Failed to update advertisement record in {dir}: {source}")]
    Io {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The data published in the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Logical path identifier of the served image (URL path of the remote)
    pub ostree_path: String,
    /// Commit timestamp of the currently deployed image
    pub head_commit_timestamp: DateTime<Utc>,
    /// Port peers should connect to
    pub port: u16,
}

impl Advertisement {
    /// Render the Avahi service file.
    pub fn render(&self) -> String {
        format!(
            "<?xml version=\"1.0\" standalone=\"no\"?>\n\
             <!DOCTYPE service-group SYSTEM \"avahi-service.dtd\">\n\
             <service-group>\n  \
               <name replace-wildcards=\"yes\">osupdate image source on %h</name>\n  \
               <service>\n    \
                 <type>{service_type}</type>\n    \
                 <port>{port}</port>\n    \
                 <txt-record>{version_key}=1</txt-record>\n    \
                 <txt-record>{path_key}={path}</txt-record>\n    \
                 <txt-record>{ts_key}={ts}</txt-record>\n  \
               </service>\n\
             </service-group>\n",
            service_type = SERVICE_TYPE,
            port = self.port,
            version_key = TXT_VERSION_KEY,
            path_key = TXT_OSTREE_PATH_KEY,
            path = xml_escape(&self.ostree_path),
            ts_key = TXT_HEAD_COMMIT_TIMESTAMP_KEY,
            ts = self
                .head_commit_timestamp
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}

/// Write the record into `dir`, creating the directory if needed.
///
/// Calling this repeatedly with the same advertisement leaves the same bytes
/// on disk and is not an error.
pub fn generate(dir: &Path, advertisement: &Advertisement) -> Result<(), AdvertiseError> {
    if advertisement.ostree_path.is_empty() || advertisement.ostree_path.contains('\n') {
        return Err(AdvertiseError::InvalidOstreePath(
            advertisement.ostree_path.clone(),
        ));
    }

    let contents = advertisement.render();
    let target = dir.join(SERVICE_FILE_NAME);

    if std::fs::read(&target).map(|c| c == contents.as_bytes()).unwrap_or(false) {
        debug!(path = %target.display(), "Advertisement record already up to date");
        return Ok(());
    }

    save_or_delete(Some(contents.as_bytes()), dir, SERVICE_FILE_NAME).map_err(|source| {
        AdvertiseError::Io {
            dir: dir.to_path_buf(),
            source,
        }
    })?;

    info!(
        path = %target.display(),
        ostree_path = %advertisement.ostree_path,
        "Advertisement record written"
    );
    Ok(())
}

/// Remove the record from `dir`. A missing record is not an error.
pub fn delete(dir: &Path) -> Result<(), AdvertiseError> {
    save_or_delete(None, dir, SERVICE_FILE_NAME).map_err(|source| AdvertiseError::Io {
        dir: dir.to_path_buf(),
        source,
    })
}

/// Strip leading slashes from a remote URL's path component, giving the
/// OSTree path peers should request.
pub fn ostree_path_from_url(url: &str) -> Option<String> {
    let after_scheme = url.split_once("://").map(|(_, rest)| rest)?;
    let path = after_scheme
        .find('/')
        .map(|i| &after_scheme[i..])
        .unwrap_or("");
    let path = path.split(['?', '#']).next().unwrap_or("");

    Some(path.trim_start_matches('/').to_string())
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
