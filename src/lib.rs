pub mod agent;
pub mod cluster_state;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod fanout;
pub mod machine;
pub mod planner;
pub mod rules;
pub mod store;
pub mod topology;
