//! Network state checks that gate automatic runs.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Overrides detection and reports an unmetered online connection.
pub const ASSUME_ONLINE_ENV: &str = "OSUPDATE_AUTOUPDATER_ASSUME_ONLINE";

/// Interface name prefixes of mobile broadband and tethering links.
const METERED_PREFIXES: &[&str] = &["wwan", "ppp", "bnep", "wmx"];

pub trait Connectivity {
    /// Whether there is a usable network connection.
    fn is_online(&self) -> bool;

    /// Whether the connection carrying the default route is metered.
    fn is_metered(&self) -> bool;
}

/// Fixed answers, for tests and the environment override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedConnectivity {
    pub online: bool,
    pub metered: bool,
}

impl Connectivity for FixedConnectivity {
    fn is_online(&self) -> bool {
        self.online
    }

    fn is_metered(&self) -> bool {
        self.metered
    }
}

/// Reads link state from sysfs and the routing table from procfs.
#[derive(Debug, Clone)]
pub struct SysfsConnectivity {
    net_class: PathBuf,
    route_table: PathBuf,
}

impl Default for SysfsConnectivity {
    fn default() -> Self {
        Self::with_roots("/sys/class/net", "/proc/net/route")
    }
}

impl SysfsConnectivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roots(net_class: impl Into<PathBuf>, route_table: impl Into<PathBuf>) -> Self {
        Self {
            net_class: net_class.into(),
            route_table: route_table.into(),
        }
    }

    fn default_route_interfaces(&self) -> Vec<String> {
        let table = match fs::read_to_string(&self.route_table) {
            Ok(table) => table,
            Err(e) => {
                warn!(path = %self.route_table.display(), error = %e, "Failed to read routing table");
                return Vec::new();
            }
        };

        // Iface Destination Gateway Flags ...; the first line is a header.
        table
            .lines()
            .skip(1)
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let iface = fields.next()?;
                let destination = fields.next()?;
                (destination == "00000000").then(|| iface.to_string())
            })
            .collect()
    }

    fn is_link_up(&self, iface: &str) -> bool {
        let dir = self.net_class.join(iface);
        match read_trimmed(&dir.join("operstate")).as_deref() {
            Some("up") => true,
            // Some drivers (tun, ppp) never report an operstate.
            Some("unknown") => read_trimmed(&dir.join("carrier")).as_deref() == Some("1"),
            _ => false,
        }
    }

    fn is_metered_interface(&self, iface: &str) -> bool {
        if METERED_PREFIXES.iter().any(|prefix| iface.starts_with(prefix)) {
            return true;
        }
        fs::read_to_string(self.net_class.join(iface).join("uevent"))
            .map(|uevent| uevent.lines().any(|line| line.trim() == "DEVTYPE=wwan"))
            .unwrap_or(false)
    }

    fn active_default_interfaces(&self) -> Vec<String> {
        self.default_route_interfaces()
            .into_iter()
            .filter(|iface| self.is_link_up(iface))
            .collect()
    }
}

impl Connectivity for SysfsConnectivity {
    fn is_online(&self) -> bool {
        let active = self.active_default_interfaces();
        debug!(interfaces = ?active, "Active default route interfaces");
        !active.is_empty()
    }

    fn is_metered(&self) -> bool {
        // With several default routes any metered one could be used.
        self.active_default_interfaces()
            .iter()
            .any(|iface| self.is_metered_interface(iface))
    }
}

/// The connectivity source for this process.
pub fn detect() -> Box<dyn Connectivity> {
    if assume_online(std::env::var(ASSUME_ONLINE_ENV).ok().as_deref()) {
        debug!("{ASSUME_ONLINE_ENV} set, assuming an unmetered connection");
        return Box::new(FixedConnectivity {
            online: true,
            metered: false,
        });
    }
    Box::new(SysfsConnectivity::new())
}

fn assume_online(value: Option<&str>) -> bool {
    matches!(value, Some(v) if !v.is_empty() && v != "0")
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HEADER: &str =
        "Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT\n";

    struct FakeHost {
        dir: TempDir,
    }

    impl FakeHost {
        fn new(routes: &[(&str, &str)]) -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir_all(dir.path().join("net")).unwrap();
            let mut table = HEADER.to_string();
            for (iface, destination) in routes {
                table.push_str(&format!(
                    "{iface}\t{destination}\t0102A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0\n"
                ));
            }
            std::fs::write(dir.path().join("route"), table).unwrap();
            Self { dir }
        }

        fn link(&self, iface: &str, operstate: &str, carrier: &str, uevent: &str) {
            let dir = self.dir.path().join("net").join(iface);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("operstate"), format!("{operstate}\n")).unwrap();
            std::fs::write(dir.join("carrier"), format!("{carrier}\n")).unwrap();
            std::fs::write(dir.join("uevent"), uevent).unwrap();
        }

        fn connectivity(&self) -> SysfsConnectivity {
            SysfsConnectivity::with_roots(self.dir.path().join("net"), self.dir.path().join("route"))
        }
    }

    #[test]
    fn test_wired_default_route() {
        let host = FakeHost::new(&[("eth0", "00000000"), ("eth0", "0002A8C0")]);
        host.link("eth0", "up", "1", "INTERFACE=eth0\n");

        let connectivity = host.connectivity();
        assert!(connectivity.is_online());
        assert!(!connectivity.is_metered());
    }

    #[test]
    fn test_link_down_is_offline() {
        let host = FakeHost::new(&[("eth0", "00000000")]);
        host.link("eth0", "down", "0", "");
        assert!(!host.connectivity().is_online());
    }

    #[test]
    fn test_no_default_route_is_offline() {
        let host = FakeHost::new(&[("eth0", "0002A8C0")]);
        host.link("eth0", "up", "1", "");
        assert!(!host.connectivity().is_online());
    }

    #[test]
    fn test_unknown_operstate_uses_carrier() {
        let host = FakeHost::new(&[("tun0", "00000000")]);
        host.link("tun0", "unknown", "1", "DEVTYPE=tun\n");
        assert!(host.connectivity().is_online());
    }

    #[test]
    fn test_mobile_links_are_metered() {
        let host = FakeHost::new(&[("wwan0", "00000000")]);
        host.link("wwan0", "up", "1", "");
        assert!(host.connectivity().is_metered());

        let host = FakeHost::new(&[("usb0", "00000000")]);
        host.link("usb0", "up", "1", "INTERFACE=usb0\nDEVTYPE=wwan\n");
        assert!(host.connectivity().is_metered());
    }

    #[test]
    fn test_missing_route_table_is_offline() {
        let dir = TempDir::new().unwrap();
        let connectivity = SysfsConnectivity::with_roots(dir.path(), dir.path().join("route"));
        assert!(!connectivity.is_online());
        assert!(!connectivity.is_metered());
    }

    #[test]
    fn test_assume_online_values() {
        assert!(assume_online(Some("1")));
        assert!(assume_online(Some("yes")));
        assert!(!assume_online(Some("0")));
        assert!(!assume_online(Some("")));
        assert!(!assume_online(None));
    }
}
