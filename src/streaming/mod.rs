//! Socket thread loops for the TCP command channel and the optional UDP
//! data channel.

pub(crate) mod command_channel;
pub(crate) mod data_channel;

pub(crate) use command_channel::{CommandReader, CommandWriter};
pub(crate) use data_channel::DataReader;
