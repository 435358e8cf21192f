//! Reverse proxy wiring

use crate::bridge::cli;
use crate::error::{Result, WardenError};
use crate::topology::{RoleTopology, SubComponent};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// Service name of the reverse proxy
pub const PROXY_SERVICE_NAME: &str = "iisproxy";

/// Placement zone of the reverse proxy
pub const PROXY_ZONE: &str = "ui";

/// Custom command adding a rewrite rule
pub const ADD_RULE_COMMAND: &str = "rewrite_add";

/// Custom command removing a rewrite rule
pub const REMOVE_RULE_COMMAND: &str = "rewrite_remove";

/// Custom command listing rules; every running instance answers, which is
/// what discovery counts
pub const LIST_RULES_COMMAND: &str = "rewrite_list";

/// One inbound rewrite rule routing a URL prefix to a local web workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub name: String,
    pub pattern: String,
    pub rewrite_url: String,
}

impl RewriteRule {
    /// Rule for a web component served at `address:port` under `context_path`
    pub fn for_context(context_path: &str, address: IpAddr, port: u16) -> Self {
        let name = context_path.trim_matches('/').to_string();
        Self {
            pattern: format!("^{}/(.*)", name),
            rewrite_url: format!("http://{}:{}/{}/{{R:1}}", address, port, name),
            name,
        }
    }

    /// Parameters sent when adding the rule
    pub fn parameters(&self) -> Vec<(String, String)> {
        vec![
            ("name".to_string(), self.name.clone()),
            ("pattern".to_string(), self.pattern.clone()),
            ("rewriteUrl".to_string(), self.rewrite_url.clone()),
            ("patternSyntax".to_string(), "ECMAScript".to_string()),
            ("stopProcessing".to_string(), "true".to_string()),
        ]
    }

    /// CLI text adding this rule
    pub fn add_command(&self) -> String {
        cli::invoke(PROXY_SERVICE_NAME, ADD_RULE_COMMAND, &self.parameters())
    }

    /// CLI text removing this rule
    pub fn remove_command(&self) -> String {
        cli::invoke(
            PROXY_SERVICE_NAME,
            REMOVE_RULE_COMMAND,
            &[("name".to_string(), self.name.clone())],
        )
    }
}

/// Rules for every enabled web component of a topology
pub fn rules_for(topology: &RoleTopology, address: IpAddr) -> Vec<RewriteRule> {
    topology
        .web_components()
        .into_iter()
        .filter_map(|component: SubComponent| {
            let port = topology.port_of(component)?;
            let context = topology.context_path_of(component)?;
            Some(RewriteRule::for_context(context, address, port))
        })
        .collect()
}

/// CLI text installing the proxy service
pub fn install_command(recipe_dir: &str) -> String {
    cli::install_service(PROXY_SERVICE_NAME, PROXY_ZONE, recipe_dir)
}

/// CLI text uninstalling the proxy service
pub fn uninstall_command() -> String {
    cli::uninstall_service(PROXY_SERVICE_NAME)
}

/// CLI text that every running proxy instance answers
pub fn discovery_command() -> String {
    cli::invoke(PROXY_SERVICE_NAME, LIST_RULES_COMMAND, &[])
}

/// Tracks which proxy instance ordinals have been seen across polls
#[derive(Debug)]
pub struct ProxyDiscovery {
    expected: u32,
    seen: BTreeSet<u32>,
    pattern: Regex,
}

impl ProxyDiscovery {
    pub fn new(expected: u32) -> Result<Self> {
        // instances report as "instance #<ordinal>@<host>"
        let pattern = Regex::new(r"instance #(\d+)")
            .map_err(|e| WardenError::Configuration(format!("Invalid instance pattern: {}", e)))?;
        Ok(Self {
            expected,
            seen: BTreeSet::new(),
            pattern,
        })
    }

    /// Record the ordinals present in one poll's output
    pub fn observe(&mut self, output: &str) {
        for captures in self.pattern.captures_iter(output) {
            if let Ok(ordinal) = captures[1].parse::<u32>() {
                self.seen.insert(ordinal);
            }
        }
    }

    /// Ordinals in `1..=expected` not seen yet
    pub fn missing(&self) -> Vec<u32> {
        (1..=self.expected)
            .filter(|ordinal| !self.seen.contains(ordinal))
            .collect()
    }

    /// Every expected ordinal has been seen at least once
    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}
