pub mod attachments;
