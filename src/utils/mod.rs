pub mod plate_parser;
pub mod time_codec;
