pub mod annotations;
pub mod backup_exchange;
pub mod core;
pub mod documents;
pub mod grades;
pub mod imports;
pub mod learning_path;
pub mod mindmap;
pub mod quiz;
pub mod rag;
pub mod schedules;
pub mod session;
pub mod setup;
pub mod subjects;
pub mod tasks;
pub mod workspaces;
