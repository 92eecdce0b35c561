//! IPsec tunnel policies and states.

use tracing::info;

use super::default::{DEFAULT_REQID, DefaultNetwork};
use super::{NetworkError, Result, missing_ok};
use crate::netlink::xfrm::{SecurityAssociation, SecurityPolicy};
use crate::netlink::{PolicyDirection, PolicyParams, StateParams};
use crate::nodeconfig::{XfrmPolicy, XfrmState};
use crate::util::addr::{parse_addr, parse_cidr};
use crate::util::hex;

fn reqid(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| NetworkError::Invalid(format!("invalid reqid {}", value)))
}

fn policy_params(policy: &XfrmPolicy) -> Result<PolicyParams> {
    let dir = u8::try_from(policy.dir)
        .ok()
        .and_then(PolicyDirection::from_u8)
        .ok_or_else(|| NetworkError::Invalid(format!("invalid policy dir {}", policy.dir)))?;
    Ok(PolicyParams {
        src_net: parse_cidr(&policy.left_net)?.network(),
        dst_net: parse_cidr(&policy.right_net)?.network(),
        dir,
        tmpl_src: parse_addr(&policy.left_ip)?,
        tmpl_dst: parse_addr(&policy.right_ip)?,
        reqid: reqid(policy.reqid)?,
    })
}

fn state_params(state: &XfrmState) -> Result<StateParams> {
    Ok(StateParams {
        src: parse_addr(&state.left_ip)?,
        dst: parse_addr(&state.right_ip)?,
        spi: state.spi,
        reqid: reqid(state.reqid)?,
        aead_key: hex::decode(&state.psk)?,
    })
}

/// Policies with at least one template, reported through the first one.
fn policies_from(policies: &[SecurityPolicy]) -> Vec<XfrmPolicy> {
    policies
        .iter()
        .filter_map(|p| {
            let tmpl = p.templates.first()?;
            Some(XfrmPolicy {
                left_ip: tmpl.src.map(|a| a.to_string()).unwrap_or_default(),
                left_net: p.src_net.map(|n| n.to_string()).unwrap_or_default(),
                right_ip: tmpl.dst.map(|a| a.to_string()).unwrap_or_default(),
                right_net: p.dst_net.map(|n| n.to_string()).unwrap_or_default(),
                reqid: tmpl.reqid as i32,
                dir: p.direction.map_or(0, |d| i32::from(d.as_u8())),
            })
        })
        .collect()
}

fn states_from(states: &[SecurityAssociation]) -> Vec<XfrmState> {
    states
        .iter()
        .map(|s| XfrmState {
            left_ip: s.src.map(|a| a.to_string()).unwrap_or_default(),
            right_ip: s.dst.map(|a| a.to_string()).unwrap_or_default(),
            reqid: s.reqid as i32,
            spi: s.spi,
            psk: s.aead.as_ref().map(|a| hex::encode(&a.key)).unwrap_or_default(),
        })
        .collect()
}

impl DefaultNetwork {
    /// Add, or update in place if a policy with the same selector exists.
    pub(super) async fn add_xfrm_policy(&self, policy: &XfrmPolicy) -> Result<()> {
        let params = policy_params(policy)?;
        let conn = self.xfrm_conn().await;
        if conn.get_policy(&params).await?.is_some() {
            info!(src = %params.src_net, dst = %params.dst_net, dir = ?params.dir, "updating ipsec policy");
            conn.update_policy(&params).await?;
        } else {
            info!(src = %params.src_net, dst = %params.dst_net, dir = ?params.dir, "adding ipsec policy");
            conn.add_policy(&params).await?;
        }
        Ok(())
    }

    pub(super) async fn delete_xfrm_policy(&self, policy: &XfrmPolicy) -> Result<()> {
        if policy.reqid != DEFAULT_REQID {
            info!(reqid = policy.reqid, "xfrm policy not created by the agent, skipping delete");
            return Ok(());
        }
        let params = policy_params(policy)?;
        info!(src = %params.src_net, dst = %params.dst_net, dir = ?params.dir, "deleting ipsec policy");
        missing_ok(self.xfrm_conn().await.del_policy(&params).await)
    }

    /// Add, or update in place if an SA with the same id exists.
    pub(super) async fn add_xfrm_state(&self, state: &XfrmState) -> Result<()> {
        let params = state_params(state)?;
        let conn = self.xfrm_conn().await;
        if conn.get_state(&params).await?.is_some() {
            info!(src = %params.src, dst = %params.dst, spi = params.spi, "updating xfrm state");
            conn.update_state(&params).await?;
        } else {
            info!(src = %params.src, dst = %params.dst, spi = params.spi, "adding xfrm state");
            conn.add_state(&params).await?;
        }
        Ok(())
    }

    pub(super) async fn delete_xfrm_state(&self, state: &XfrmState) -> Result<()> {
        if state.reqid != DEFAULT_REQID {
            info!(reqid = state.reqid, "xfrm state not created by the agent, skipping delete");
            return Ok(());
        }
        let params = state_params(state)?;
        info!(src = %params.src, dst = %params.dst, spi = params.spi, "deleting xfrm state");
        missing_ok(self.xfrm_conn().await.del_state(&params).await)
    }

    pub(super) async fn load_xfrm_policies(&self) -> Result<Vec<XfrmPolicy>> {
        let policies = self.xfrm_conn().await.get_security_policies().await?;
        Ok(policies_from(&policies))
    }

    pub(super) async fn load_xfrm_states(&self) -> Result<Vec<XfrmState>> {
        let states = self.xfrm_conn().await.get_security_associations().await?;
        Ok(states_from(&states))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::xfrm::{AeadAlgorithm, PolicyTemplate};
    use crate::util::addr::IpNet;

    fn sample_policy() -> XfrmPolicy {
        XfrmPolicy {
            left_ip: "192.168.0.5".into(),
            left_net: "10.233.0.0/16".into(),
            right_ip: "192.168.0.7".into(),
            right_net: "10.234.0.0/16".into(),
            reqid: DEFAULT_REQID,
            dir: 1,
        }
    }

    #[test]
    fn test_policy_params() {
        let params = policy_params(&sample_policy()).unwrap();
        assert_eq!(params.dir, PolicyDirection::Out);
        assert_eq!(params.src_net.to_string(), "10.233.0.0/16");
        assert_eq!(params.reqid, 336);

        let bad = XfrmPolicy {
            dir: 5,
            ..sample_policy()
        };
        assert!(matches!(policy_params(&bad), Err(NetworkError::Invalid(_))));
    }

    #[test]
    fn test_state_params_rejects_bad_psk() {
        let state = XfrmState {
            left_ip: "192.168.0.5".into(),
            right_ip: "192.168.0.7".into(),
            reqid: DEFAULT_REQID,
            spi: 0x1234,
            psk: "00112g".into(),
        };
        assert!(matches!(state_params(&state), Err(NetworkError::Hex(_))));
    }

    #[test]
    fn test_policies_from_dump() {
        let dumped = vec![
            SecurityPolicy {
                src_net: Some("10.233.0.0/16".parse::<IpNet>().unwrap()),
                dst_net: Some("10.234.0.0/16".parse::<IpNet>().unwrap()),
                direction: Some(PolicyDirection::Out),
                index: 9,
                templates: vec![PolicyTemplate {
                    src: Some("192.168.0.5".parse().unwrap()),
                    dst: Some("192.168.0.7".parse().unwrap()),
                    reqid: 336,
                    proto: 50,
                    mode: 1,
                }],
            },
            SecurityPolicy {
                src_net: None,
                dst_net: None,
                direction: Some(PolicyDirection::In),
                index: 10,
                templates: Vec::new(),
            },
        ];
        assert_eq!(policies_from(&dumped), vec![sample_policy()]);
    }

    #[test]
    fn test_states_from_dump_hex_encodes_key() {
        let dumped = vec![SecurityAssociation {
            src: Some("192.168.0.5".parse().unwrap()),
            dst: Some("192.168.0.7".parse().unwrap()),
            spi: 0x1234,
            reqid: 336,
            proto: 50,
            mode: 1,
            aead: Some(AeadAlgorithm {
                name: "rfc4106(gcm(aes))".into(),
                key_len: 32,
                icv_len: 128,
                key: vec![0x00, 0x11, 0x22, 0x33],
            }),
        }];
        let states = states_from(&dumped);
        assert_eq!(states[0].psk, "00112233");
        assert_eq!(states[0].spi, 0x1234);
    }
}
