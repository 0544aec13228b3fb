//! auditstack Core
//!
//! Resource graph for the audit task infrastructure: typed resources,
//! creation conditions, a two-tier network builder with NAT-free route
//! suppression, and synthesis into a CloudFormation template.

pub mod cidr;
pub mod condition;
pub mod differ;
pub mod iam;
pub mod network;
pub mod plan;
pub mod resource;
pub mod review;
pub mod stack;
pub mod suppress;
pub mod template;
