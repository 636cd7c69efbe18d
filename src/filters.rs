//! Relay eligibility predicates
//!
//! Each filter is a pure function of a message state and the filter
//! configuration. A message is relayed only if all of them pass; the first
//! rejection is reported so operators can see why it was filtered.

use bech32::FromBase32;

use crate::address_codec::{decode_destination_caller, is_zero};
use crate::config::FilterConfig;
use crate::types::{MessageKind, MessageState};

/// Which filter rejected a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    DestinationCaller,
    DisabledRoute,
    ChannelNotWhitelisted,
}

impl FilterReason {
    pub fn label(&self) -> &'static str {
        match self {
            FilterReason::DestinationCaller => "destination_caller",
            FilterReason::DisabledRoute => "disabled_route",
            FilterReason::ChannelNotWhitelisted => "channel_not_whitelisted",
        }
    }
}

/// Run every filter; `None` means the message may be relayed
pub fn evaluate(state: &MessageState, config: &FilterConfig) -> Option<FilterReason> {
    if !destination_caller_allowed(state, config) {
        return Some(FilterReason::DestinationCaller);
    }
    if !route_enabled(state, config) {
        return Some(FilterReason::DisabledRoute);
    }
    if !channel_whitelisted(state, config) {
        return Some(FilterReason::ChannelNotWhitelisted);
    }
    None
}

/// Unrestricted (all-zero) callers pass; otherwise the caller must be our minter
pub fn destination_caller_allowed(state: &MessageState, config: &FilterConfig) -> bool {
    if is_zero(&state.destination_caller) {
        return true;
    }

    let Some(minter) = config.minters.get(&state.dest_domain) else {
        return false;
    };

    // Compare account bytes; bech32 text may legally be upper or lower case
    let Ok((_, data, _)) = bech32::decode(minter) else {
        return false;
    };
    match Vec::<u8>::from_base32(&data) {
        Ok(minter) => minter == decode_destination_caller(&state.destination_caller),
        Err(_) => false,
    }
}

/// The destination domain must be present and map to itself
pub fn route_enabled(state: &MessageState, config: &FilterConfig) -> bool {
    config.enabled_routes.get(&state.dest_domain) == Some(&state.dest_domain)
}

/// Only forwards are subject to the channel whitelist
pub fn channel_whitelisted(state: &MessageState, config: &FilterConfig) -> bool {
    if state.kind != MessageKind::Forward || !config.filter_forwards_by_channel {
        return true;
    }

    state
        .forwarding_channel
        .as_ref()
        .is_some_and(|channel| config.forwarding_channel_whitelist.contains(channel))
}
