//! Masquerade exemptions through a `hash:net` IP set.

use std::net::IpAddr;

use tracing::info;

use super::command;
use super::default::DefaultNetwork;
use super::{IpFamily, NetworkError, Result};
use crate::nodeconfig::IpSet;
use crate::util::addr::parse_cidr;

/// The set the masquerade bypass rule matches on.
pub const AVOID_MASQ_SET: &str = "kosmosipset";

const MAX_ELEM: &str = "1048576";

/// `nat POSTROUTING` rule returning early for destinations in the set.
pub const AVOID_MASQ_RULE: [&str; 7] = [
    "-m",
    "set",
    "--match-set",
    AVOID_MASQ_SET,
    "dst",
    "-j",
    "RETURN",
];

fn is_missing_set(stderr: &str) -> bool {
    stderr.contains("does not exist")
}

fn is_missing_entry(stderr: &str) -> bool {
    stderr.contains("it's not added") || is_missing_set(stderr)
}

/// Members of `name` from `ipset save <name>` output.
///
/// Host entries are printed without a prefix; they get `/32` (or `/128`)
/// so they compare equal to configured CIDRs.
pub fn parse_save(output: &str, name: &str) -> Vec<IpSet> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some("add"), Some(set), Some(entry)) if set == name => Some(entry),
                _ => None,
            }
        })
        .map(|entry| IpSet {
            cidr: with_prefix(entry),
            name: name.to_string(),
        })
        .collect()
}

fn with_prefix(entry: &str) -> String {
    if entry.contains('/') {
        return entry.to_string();
    }
    match entry.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => format!("{}/32", entry),
        Ok(IpAddr::V6(_)) => format!("{}/128", entry),
        Err(_) => entry.to_string(),
    }
}

impl DefaultNetwork {
    pub(super) async fn add_ipset(&self, item: &IpSet) -> Result<()> {
        let net = parse_cidr(&item.cidr)?;
        if IpFamily::of(&net.addr) != IpFamily::V4 {
            return Err(NetworkError::Ipv4Only(item.cidr.clone()));
        }

        command::run_ok(
            "ipset",
            &[
                "create", &item.name, "hash:net", "family", "inet", "maxelem", MAX_ELEM, "-exist",
            ],
        )
        .await?;

        info!(set = %item.name, cidr = %item.cidr, "adding ipset entry");
        command::run_ok("ipset", &["add", &item.name, &item.cidr, "-exist"])
            .await
            .map(drop)
    }

    pub(super) async fn delete_ipset(&self, item: &IpSet) -> Result<()> {
        info!(set = %item.name, cidr = %item.cidr, "deleting ipset entry");
        let args = ["del", item.name.as_str(), item.cidr.as_str()];
        let output = command::run("ipset", &args).await?;
        if output.success() || is_missing_entry(&output.stderr) {
            Ok(())
        } else {
            Err(output.into_error(command::render("ipset", &args)))
        }
    }

    /// Hook the set into `nat POSTROUTING` at position 2.
    pub(super) async fn ensure_avoid_masq_rule(&self) -> Result<()> {
        self.firewall()
            .insert_unique(IpFamily::V4, "nat", "POSTROUTING", 2, &AVOID_MASQ_RULE)
            .await
    }

    /// Members of the agent's set. A missing set has none.
    pub(super) async fn load_ipsets(&self) -> Result<Vec<IpSet>> {
        let args = ["save", AVOID_MASQ_SET];
        let output = command::run("ipset", &args).await?;
        if output.success() {
            Ok(parse_save(&output.stdout, AVOID_MASQ_SET))
        } else if is_missing_set(&output.stderr) {
            Ok(Vec::new())
        } else {
            Err(output.into_error(command::render("ipset", &args)))
        }
    }
}
