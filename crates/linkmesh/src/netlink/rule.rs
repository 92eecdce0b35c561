//! Policy routing rules.

use super::builder::MessageBuilder;
use super::connection::Connection;
use super::error::Result;
use super::message::{NLM_F_ACK, NLM_F_CREATE, NLM_F_EXCL, NLM_F_REQUEST, NlMsgType};
use super::types::rule::{FR_ACT_TO_TBL, FibRuleHdr, fra};

/// `ip rule add priority <priority> lookup <table>` for one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRule {
    /// AF_INET or AF_INET6.
    pub family: u8,
    pub priority: u32,
    pub table: u32,
}

impl TableRule {
    pub fn v4(priority: u32, table: u32) -> Self {
        Self {
            family: libc::AF_INET as u8,
            priority,
            table,
        }
    }

    pub fn v6(priority: u32, table: u32) -> Self {
        Self {
            family: libc::AF_INET6 as u8,
            priority,
            table,
        }
    }

    fn build(&self) -> MessageBuilder {
        let mut builder = MessageBuilder::new(
            NlMsgType::RTM_NEWRULE,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        );
        builder.append(&FibRuleHdr {
            family: self.family,
            table: u8::try_from(self.table).unwrap_or(0),
            action: FR_ACT_TO_TBL,
            ..Default::default()
        });
        builder.append_attr_u32(fra::PRIORITY, self.priority);
        builder.append_attr_u32(fra::TABLE, self.table);
        builder
    }
}

impl Connection {
    /// Add a rule. EEXIST if the same rule is already installed.
    pub async fn add_rule(&self, rule: &TableRule) -> Result<()> {
        self.request_ack(rule.build()).await.map_err(|e| {
            e.with_context(format!(
                "adding rule priority {} lookup {}",
                rule.priority, rule.table
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::{AttrIter, get};
    use crate::netlink::message::NLMSG_HDRLEN;
    use zerocopy::FromBytes;

    #[test]
    fn test_rule_layout() {
        let msg = TableRule::v6(200, 200).build().finish();
        let (hdr, rest) = FibRuleHdr::read_from_prefix(&msg[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(hdr.family, libc::AF_INET6 as u8);
        assert_eq!(hdr.table, 200);
        assert_eq!(hdr.action, FR_ACT_TO_TBL);

        let attrs: Vec<_> = AttrIter::new(rest)
            .map(|(k, d)| (k, get::u32_ne(d).unwrap()))
            .collect();
        assert_eq!(attrs, vec![(fra::PRIORITY, 200), (fra::TABLE, 200)]);
    }
}
