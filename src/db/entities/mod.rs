pub mod notification_channels;
