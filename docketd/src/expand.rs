//! Placeholder expansion for exec directives.
//!
//! An argument token that is exactly a placeholder name is replaced by one
//! value per host resource, and the command is run once per value. Only the
//! first placeholder in an argument list is expanded.

use crate::devices::DeviceCache;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Expandable argument tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// Every network interface listed in `/proc/net/dev`.
    Net,
    /// Every non-loop block device, as its `/dev` path.
    Block,
}

impl Placeholder {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "%NET" => Some(Self::Net),
            "%BLOCK" => Some(Self::Block),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Self::Net => "%NET",
            Self::Block => "%BLOCK",
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Result of expanding one argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    /// Placeholder found and its argument index.
    pub placeholder: Option<(usize, Placeholder)>,
    /// Concrete argument lists to run, in order.
    pub commands: Vec<Vec<String>>,
}

/// Resolves placeholders against the local host.
#[derive(Debug, Clone)]
pub struct Expander {
    devices: Arc<DeviceCache>,
    net_dev_path: PathBuf,
    block_class_dir: PathBuf,
}

impl Expander {
    pub fn new(devices: Arc<DeviceCache>, net_dev_path: PathBuf, block_class_dir: PathBuf) -> Self {
        Self {
            devices,
            net_dev_path,
            block_class_dir,
        }
    }

    /// Values a placeholder stands for right now.
    pub async fn values(&self, placeholder: Placeholder) -> Vec<String> {
        match placeholder {
            Placeholder::Net => self.interfaces().await,
            Placeholder::Block => self.block_devices().await,
        }
    }

    /// Expand the first placeholder in `argv`.
    ///
    /// Without a placeholder the list is returned as the single command. A
    /// placeholder with no values yields no commands at all.
    pub async fn expand_argv(&self, argv: &[String]) -> Expansion {
        let found = argv
            .iter()
            .enumerate()
            .find_map(|(i, arg)| Placeholder::from_token(arg).map(|p| (i, p)));

        let Some((index, placeholder)) = found else {
            return Expansion {
                placeholder: None,
                commands: vec![argv.to_vec()],
            };
        };

        let commands = self
            .values(placeholder)
            .await
            .into_iter()
            .map(|value| {
                let mut command = argv.to_vec();
                command[index] = value;
                command
            })
            .collect();

        Expansion {
            placeholder: Some((index, placeholder)),
            commands,
        }
    }

    async fn interfaces(&self) -> Vec<String> {
        match tokio::fs::read_to_string(&self.net_dev_path).await {
            Ok(content) => interface_names(&content),
            Err(e) => {
                warn!(
                    "Failed to read interface table {}: {}",
                    self.net_dev_path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    async fn block_devices(&self) -> Vec<String> {
        let numbers = self.block_numbers().await;
        if numbers.is_empty() {
            return Vec::new();
        }

        let generation = self.devices.acquire().await;
        let mut paths = Vec::with_capacity(numbers.len());
        for (name, major, minor) in &numbers {
            match generation.lookup_block(*major, *minor) {
                Some(path) => paths.push(path.display().to_string()),
                None => debug!("No device node for {} ({}:{})", name, major, minor),
            }
        }
        self.devices.release(generation);
        paths
    }

    /// `(name, major, minor)` for each non-loop block device, sorted by name.
    async fn block_numbers(&self) -> Vec<(String, u32, u32)> {
        let mut dir = match tokio::fs::read_dir(&self.block_class_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(
                    "Failed to list block devices in {}: {}",
                    self.block_class_dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut numbers = Vec::new();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Error listing block devices: {}", e);
                    break;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("loop") {
                continue;
            }
            match tokio::fs::read_to_string(entry.path().join("dev")).await {
                Ok(dev) => match parse_dev_number(&dev) {
                    Some((major, minor)) => numbers.push((name, major, minor)),
                    None => debug!("Unparseable device number for {}: {:?}", name, dev),
                },
                Err(e) => debug!("No device number for {}: {}", name, e),
            }
        }

        numbers.sort();
        numbers
    }
}

/// Interface names from the contents of `/proc/net/dev`, in listed order.
///
/// Every interface the kernel knows is listed, including ones with no
/// address assigned.
pub fn interface_names(content: &str) -> Vec<String> {
    let listed = content
        .lines()
        .filter_map(|line| line.split_once(':'))
        // Header lines carry a '|' column separator instead of "name:".
        .filter(|(name, _)| !name.contains('|'))
        .map(|(name, _)| name.trim());
    dedup_base_names(listed)
}

/// Fold alias labels (`eth0:1`) into their base name and drop repeats,
/// keeping first-seen order.
///
/// `/proc/net/dev` already lists base interfaces only; names from other
/// sources may still carry a label.
pub fn dedup_base_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let base = name.split(':').next().unwrap_or(name);
        if base.is_empty() || out.iter().any(|n| n == base) {
            continue;
        }
        out.push(base.to_string());
    }
    out
}

/// Parse a sysfs `dev` file ("8:0\n").
pub fn parse_dev_number(content: &str) -> Option<(u32, u32)> {
    let (major, minor) = content.trim().split_once(':')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceEntry, DeviceSource};
    use std::time::Duration;

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  123456     100    0    0    0     0          0         0   123456     100    0    0    0     0       0          0
  eth0: 9876543    2000    0    0    0     0          0        12  1234567    1500    0    0    0     0       0          0
 wlan0:       0       0    0    0    0     0          0         0        0       0    0    0    0     0       0          0
";

    struct StaticSource(Vec<DeviceEntry>);

    impl DeviceSource for StaticSource {
        fn scan(&self) -> Vec<DeviceEntry> {
            self.0.clone()
        }
    }

    fn expander_with(net_dev: &std::path::Path, block_dir: &std::path::Path) -> Expander {
        let source = Arc::new(StaticSource(vec![DeviceEntry {
            major: 8,
            minor: 0,
            is_block: true,
            mtime: 0,
            path: PathBuf::from("/dev/sda"),
        }]));
        Expander::new(
            DeviceCache::new(source, Duration::from_secs(10)),
            net_dev.to_path_buf(),
            block_dir.to_path_buf(),
        )
    }

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_placeholder_tokens() {
        assert_eq!(Placeholder::from_token("%NET"), Some(Placeholder::Net));
        assert_eq!(Placeholder::from_token("%BLOCK"), Some(Placeholder::Block));
        assert_eq!(Placeholder::from_token("%net"), None);
        assert_eq!(Placeholder::from_token("x%NET"), None);
    }

    #[test]
    fn test_interface_names() {
        assert_eq!(interface_names(NET_DEV), vec!["lo", "eth0", "wlan0"]);
        assert!(interface_names("").is_empty());
    }

    #[test]
    fn test_dedup_base_names() {
        assert_eq!(
            dedup_base_names(["eth0", "eth0:1", "lo", "eth1:0", "eth1", ""]),
            vec!["eth0", "lo", "eth1"]
        );
    }

    #[test]
    fn test_parse_dev_number() {
        assert_eq!(parse_dev_number("8:0\n"), Some((8, 0)));
        assert_eq!(parse_dev_number("259:12"), Some((259, 12)));
        assert_eq!(parse_dev_number("garbage"), None);
        assert_eq!(parse_dev_number("8:x"), None);
    }

    #[tokio::test]
    async fn test_expand_without_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let expander = expander_with(&dir.path().join("none"), dir.path());
        let expansion = expander.expand_argv(&argv(&["/bin/uname", "-a"])).await;
        assert_eq!(expansion.placeholder, None);
        assert_eq!(expansion.commands, vec![argv(&["/bin/uname", "-a"])]);
    }

    #[tokio::test]
    async fn test_expand_net_substitutes_each_interface() {
        let dir = tempfile::tempdir().unwrap();
        let net_dev = dir.path().join("net_dev");
        std::fs::write(&net_dev, NET_DEV).unwrap();
        let expander = expander_with(&net_dev, dir.path());

        let expansion = expander
            .expand_argv(&argv(&["/sbin/ethtool", "-S", "%NET", "%BLOCK"]))
            .await;
        assert_eq!(expansion.placeholder, Some((2, Placeholder::Net)));
        assert_eq!(
            expansion.commands,
            vec![
                argv(&["/sbin/ethtool", "-S", "lo", "%BLOCK"]),
                argv(&["/sbin/ethtool", "-S", "eth0", "%BLOCK"]),
                argv(&["/sbin/ethtool", "-S", "wlan0", "%BLOCK"]),
            ]
        );
    }

    #[tokio::test]
    async fn test_expand_net_with_missing_table_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let expander = expander_with(&dir.path().join("missing"), dir.path());
        let expansion = expander.expand_argv(&argv(&["/sbin/ip", "%NET"])).await;
        assert_eq!(expansion.placeholder, Some((1, Placeholder::Net)));
        assert!(expansion.commands.is_empty());
    }

    #[tokio::test]
    async fn test_expand_block_resolves_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let class = dir.path().join("block");
        for (name, dev) in [("sda", "8:0\n"), ("loop0", "7:0\n"), ("sdz", "8:400\n")] {
            std::fs::create_dir_all(class.join(name)).unwrap();
            std::fs::write(class.join(name).join("dev"), dev).unwrap();
        }
        let expander = expander_with(&dir.path().join("missing"), &class);

        let expansion = expander
            .expand_argv(&argv(&["/sbin/smartctl", "-a", "%BLOCK"]))
            .await;
        assert_eq!(expansion.placeholder, Some((2, Placeholder::Block)));
        assert_eq!(
            expansion.commands,
            vec![argv(&["/sbin/smartctl", "-a", "/dev/sda"])]
        );
    }
}
