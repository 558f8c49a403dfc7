pub mod gateway;

pub use gateway::{
    ConnError, ConnState, FieldbusGateway, GatewayConfig, GatewayConnection, GatewayIoError,
};
