//! Maps a step's `type` string to the plugin that executes it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::plugins::{
    command::CommandNode, container::ContainerNode, hitl::HitlNode, http::HttpNode, jq::JqNode,
    mail::MailNode, parallel::ParallelNode, redis::RedisNode, router::RouterNode, sftp::SftpNode,
    shell::ShellNode, sql::SqlNode, ssh::SshNode, subdag::SubDagNode,
};
use crate::ExecutableNode;

pub type NodeRegistry = HashMap<String, Arc<dyn ExecutableNode>>;

/// The registry every `Agent` starts from. `command` is also the default
/// step type (`engine::models::default_step_type`).
pub fn default_registry() -> NodeRegistry {
    let mut registry: NodeRegistry = HashMap::new();
    registry.insert("shell".into(), Arc::new(ShellNode));
    registry.insert("command".into(), Arc::new(CommandNode));
    registry.insert("direct".into(), Arc::new(CommandNode));
    registry.insert("container".into(), Arc::new(ContainerNode::new()));
    registry.insert("subdag".into(), Arc::new(SubDagNode));
    registry.insert("call".into(), Arc::new(SubDagNode));
    registry.insert("parallel".into(), Arc::new(ParallelNode));
    registry.insert("router".into(), Arc::new(RouterNode));
    registry.insert("jq".into(), Arc::new(JqNode));
    registry.insert("http".into(), Arc::new(HttpNode));
    registry.insert("ssh".into(), Arc::new(SshNode));
    registry.insert("sftp".into(), Arc::new(SftpNode));
    registry.insert("sql".into(), Arc::new(SqlNode));
    registry.insert("sqlite".into(), Arc::new(SqlNode));
    registry.insert("redis".into(), Arc::new(RedisNode));
    registry.insert("hitl".into(), Arc::new(HitlNode));
    registry.insert("mail".into(), Arc::new(MailNode));
    registry
}
