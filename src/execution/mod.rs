pub mod broadcaster;
pub mod fanout;
pub mod gateway;
pub mod lcd_client;
pub mod node_submitter;
