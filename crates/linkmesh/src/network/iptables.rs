//! iptables driver for the agent-owned NAT chains and FORWARD accepts.
//!
//! Rules are passed to the `iptables`/`ip6tables` binaries as whitespace
//! separated arguments. Configured `PREROUTING`/`POSTROUTING` rules live in
//! the agent's own chains, which `init_sys` hooks into the built-in ones.

use tracing::{info, warn};

use super::command::{self, Output};
use super::default::DefaultNetwork;
use super::{IpFamily, NetworkError, Result};
use crate::nodeconfig::Iptables;

pub const PREROUTING_CHAIN: &str = "CLUSTERLINK-PREROUTING";
pub const POSTROUTING_CHAIN: &str = "CLUSTERLINK-POSTROUTING";

const NAT: &str = "nat";
const NFT_MULTI: &str = "/sbin/xtables-nft-multi";

/// Rules mentioning an IPv6 address go to `ip6tables`.
pub fn family_of_rule(rule: &str) -> IpFamily {
    if rule.contains(':') {
        IpFamily::V6
    } else {
        IpFamily::V4
    }
}

/// Chain a configured rule is installed in.
pub fn kernel_chain(chain: &str) -> &str {
    match chain {
        "PREROUTING" => PREROUTING_CHAIN,
        "POSTROUTING" => POSTROUTING_CHAIN,
        other => other,
    }
}

/// Inverse of [`kernel_chain`] for the two agent chains.
pub fn config_chain(chain: &str) -> &str {
    match chain {
        PREROUTING_CHAIN => "PREROUTING",
        POSTROUTING_CHAIN => "POSTROUTING",
        other => other,
    }
}

pub fn split_rule(rule: &str) -> Vec<&str> {
    rule.split_whitespace().collect()
}

/// Rule specs from `iptables -S <chain>` output, without the `-A <chain>`
/// prefix. The `-N`/`-P` header line is skipped.
pub fn parse_listing(output: &str, chain: &str) -> Vec<String> {
    let prefix = format!("-A {} ", chain);
    output
        .lines()
        .filter_map(|line| line.trim_end().strip_prefix(&prefix))
        .map(str::to_string)
        .collect()
}

fn is_not_exist(output: &Output) -> bool {
    output.status == Some(1)
        && (output.stderr.contains("does a matching rule exist")
            || output.stderr.contains("No chain/target/match by that name")
            || output.stderr.contains("No such file or directory")
            || output.stderr.contains("does not exist"))
}

/// Use the nft backend when its ruleset is the larger of the two.
pub fn prefer_nft(nft_save: &str, legacy_save: &str) -> bool {
    nft_save.len() > legacy_save.len()
}

/// Which iptables binaries to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// `iptables` / `ip6tables` from `PATH`.
    System,
    /// `xtables-nft-multi iptables|ip6tables`.
    NftMulti,
}

/// An iptables front end bound to one backend.
#[derive(Debug, Clone)]
pub struct Firewall {
    backend: Backend,
}

impl Firewall {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Pick the backend that already carries the host's rules.
    ///
    /// Hosts may have both nft and legacy tooling installed with only one
    /// in use; the save output with more rules wins.
    pub async fn detect() -> Self {
        let nft = command::run("iptables-nft-save", &[]).await;
        let legacy = command::run("iptables-legacy-save", &[]).await;
        let backend = match (nft, legacy) {
            (Ok(nft), Ok(legacy)) if nft.success() && legacy.success() => {
                if prefer_nft(&nft.stdout, &legacy.stdout) {
                    Backend::NftMulti
                } else {
                    Backend::System
                }
            }
            _ => {
                warn!("cannot compare iptables-nft and iptables-legacy, using system iptables");
                Backend::System
            }
        };
        info!(?backend, "iptables backend selected");
        Self { backend }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    fn tool(family: IpFamily) -> &'static str {
        match family {
            IpFamily::V4 => "iptables",
            IpFamily::V6 => "ip6tables",
        }
    }

    async fn exec(&self, family: IpFamily, args: &[&str]) -> Result<Output> {
        let mut argv = Vec::with_capacity(args.len() + 2);
        let program = match self.backend {
            Backend::System => Self::tool(family),
            Backend::NftMulti => {
                argv.push(Self::tool(family));
                NFT_MULTI
            }
        };
        argv.push("-w");
        argv.extend_from_slice(args);
        command::run(program, &argv).await
    }

    async fn exec_ok(&self, family: IpFamily, args: &[&str]) -> Result<Output> {
        let output = self.exec(family, args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(output.into_error(command::render(Self::tool(family), args)))
        }
    }

    pub async fn exists(
        &self,
        family: IpFamily,
        table: &str,
        chain: &str,
        rule: &[&str],
    ) -> Result<bool> {
        let mut args = vec!["-t", table, "-C", chain];
        args.extend_from_slice(rule);
        let output = self.exec(family, &args).await?;
        match output.status {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(output.into_error(command::render(Self::tool(family), &args))),
        }
    }

    /// Append `rule` unless an identical rule is already in `chain`.
    pub async fn append_unique(
        &self,
        family: IpFamily,
        table: &str,
        chain: &str,
        rule: &[&str],
    ) -> Result<()> {
        if self.exists(family, table, chain, rule).await? {
            return Ok(());
        }
        let mut args = vec!["-t", table, "-A", chain];
        args.extend_from_slice(rule);
        self.exec_ok(family, &args).await.map(drop)
    }

    /// Insert `rule` at 1-based `position` unless already present.
    pub async fn insert_unique(
        &self,
        family: IpFamily,
        table: &str,
        chain: &str,
        position: usize,
        rule: &[&str],
    ) -> Result<()> {
        if self.exists(family, table, chain, rule).await? {
            return Ok(());
        }
        let position = position.to_string();
        let mut args = vec!["-t", table, "-I", chain, position.as_str()];
        args.extend_from_slice(rule);
        self.exec_ok(family, &args).await.map(drop)
    }

    pub async fn prepend_unique(
        &self,
        family: IpFamily,
        table: &str,
        chain: &str,
        rule: &[&str],
    ) -> Result<()> {
        self.insert_unique(family, table, chain, 1, rule).await
    }

    /// Delete `rule`. A missing rule or chain is not an error.
    pub async fn delete(
        &self,
        family: IpFamily,
        table: &str,
        chain: &str,
        rule: &[&str],
    ) -> Result<()> {
        let mut args = vec!["-t", table, "-D", chain];
        args.extend_from_slice(rule);
        let output = self.exec(family, &args).await?;
        if output.success() || is_not_exist(&output) {
            Ok(())
        } else {
            Err(output.into_error(command::render(Self::tool(family), &args)))
        }
    }

    pub async fn list_rules(
        &self,
        family: IpFamily,
        table: &str,
        chain: &str,
    ) -> Result<Vec<String>> {
        let output = self.exec_ok(family, &["-t", table, "-S", chain]).await?;
        Ok(parse_listing(&output.stdout, chain))
    }

    pub async fn ensure_chain(&self, family: IpFamily, table: &str, chain: &str) -> Result<()> {
        if self.exec(family, &["-t", table, "-S", chain]).await?.success() {
            return Ok(());
        }
        let args = ["-t", table, "-N", chain];
        let output = self.exec(family, &args).await?;
        if output.success() || output.stderr.contains("already exists") {
            Ok(())
        } else {
            Err(output.into_error(command::render(Self::tool(family), &args)))
        }
    }
}

impl DefaultNetwork {
    pub(super) async fn add_iptables(&self, item: &Iptables) -> Result<()> {
        let rule = split_rule(&item.rule);
        if rule.is_empty() {
            return Err(NetworkError::Invalid("empty iptables rule".into()));
        }
        let family = family_of_rule(&item.rule);
        info!(table = %item.table, chain = %item.chain, rule = %item.rule, "adding iptables rule");
        self.firewall()
            .append_unique(family, &item.table, kernel_chain(&item.chain), &rule)
            .await
    }

    pub(super) async fn delete_iptables(&self, item: &Iptables) -> Result<()> {
        let rule = split_rule(&item.rule);
        if rule.is_empty() {
            return Ok(());
        }
        let family = family_of_rule(&item.rule);
        info!(table = %item.table, chain = %item.chain, rule = %item.rule, "deleting iptables rule");
        self.firewall()
            .delete(family, &item.table, kernel_chain(&item.chain), &rule)
            .await
    }

    /// Rules of both agent chains, for both families.
    pub(super) async fn load_iptables(&self) -> Result<Vec<Iptables>> {
        let mut out = Vec::new();
        for family in [IpFamily::V4, IpFamily::V6] {
            for chain in [PREROUTING_CHAIN, POSTROUTING_CHAIN] {
                for rule in self.firewall().list_rules(family, NAT, chain).await? {
                    out.push(Iptables {
                        table: NAT.to_string(),
                        chain: config_chain(chain).to_string(),
                        rule,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Create the agent chains and hook them in front of the built-ins.
    pub(super) async fn init_chains(&self) -> Result<()> {
        info!("creating agent iptables chains");
        for family in [IpFamily::V4, IpFamily::V6] {
            for (builtin, own) in [
                ("PREROUTING", PREROUTING_CHAIN),
                ("POSTROUTING", POSTROUTING_CHAIN),
            ] {
                self.firewall().ensure_chain(family, NAT, own).await?;
                self.firewall()
                    .prepend_unique(family, NAT, builtin, &["-j", own])
                    .await?;
            }
        }
        Ok(())
    }

    /// `filter FORWARD -o <dev> -j ACCEPT`, first in the chain.
    pub(super) async fn accept_forward(&self, dev: &str, family: IpFamily) -> Result<()> {
        self.firewall()
            .prepend_unique(family, "filter", "FORWARD", &["-o", dev, "-j", "ACCEPT"])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_of_rule() {
        assert_eq!(family_of_rule("-s 10.0.0.0/8 -j RETURN"), IpFamily::V4);
        assert_eq!(family_of_rule("-s fd00::/8 -j RETURN"), IpFamily::V6);
    }

    #[test]
    fn test_chain_mapping() {
        assert_eq!(kernel_chain("PREROUTING"), PREROUTING_CHAIN);
        assert_eq!(kernel_chain("POSTROUTING"), POSTROUTING_CHAIN);
        assert_eq!(kernel_chain("FORWARD"), "FORWARD");
        assert_eq!(config_chain(POSTROUTING_CHAIN), "POSTROUTING");
        assert_eq!(config_chain(kernel_chain("PREROUTING")), "PREROUTING");
    }

    #[test]
    fn test_parse_listing() {
        let output = "-N CLUSTERLINK-POSTROUTING\n\
                      -A CLUSTERLINK-POSTROUTING -s 10.233.0.0/16 -j MASQUERADE\n\
                      -A CLUSTERLINK-POSTROUTING -d 10.234.0.0/16 -j RETURN\n";
        assert_eq!(
            parse_listing(output, POSTROUTING_CHAIN),
            vec![
                "-s 10.233.0.0/16 -j MASQUERADE".to_string(),
                "-d 10.234.0.0/16 -j RETURN".to_string(),
            ]
        );
        assert!(parse_listing("-N CLUSTERLINK-PREROUTING\n", PREROUTING_CHAIN).is_empty());
    }

    #[test]
    fn test_split_rule() {
        assert_eq!(
            split_rule(" -o vx-bridge  -j ACCEPT"),
            vec!["-o", "vx-bridge", "-j", "ACCEPT"]
        );
    }

    #[test]
    fn test_not_exist_detection() {
        let missing = Output {
            status: Some(1),
            stdout: String::new(),
            stderr: "iptables: Bad rule (does a matching rule exist in that chain?).\n".into(),
        };
        assert!(is_not_exist(&missing));

        let other = Output {
            status: Some(2),
            stdout: String::new(),
            stderr: "iptables v1.8.7: unknown option \"--bogus\"".into(),
        };
        assert!(!is_not_exist(&other));
    }

    #[test]
    fn test_prefer_nft() {
        assert!(prefer_nft("*nat\n-A X\nCOMMIT\n", "# empty\n"));
        assert!(!prefer_nft("", "*filter\nCOMMIT\n"));
    }
}
