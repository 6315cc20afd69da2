use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BusKind {
    System,
    Session,
}

/// Every flag can also come from the environment, flags win.
#[derive(Debug, Clone, PartialEq, Parser)]
#[command(
    name = "grid_meter_bridge",
    version,
    about = "Publishes MQTT grid meter readings as a Venus OS D-Bus grid meter"
)]
pub struct BridgeConfig {
    /// MQTT broker address
    #[arg(long, env = "MQTT_BROKER", default_value = "192.168.2.8")]
    pub broker: String,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub port: u16,

    /// Topic carrying instantaneous grid power in W
    #[arg(
        long = "topic",
        env = "MQTT_POWER_TOPIC",
        default_value = "dev37/r/em_cur_fast"
    )]
    pub power_topic: String,

    /// Topic carrying the sold energy counter in kWh
    #[arg(long, env = "MQTT_SOLD_ENERGY_TOPIC", default_value = "dev37/r/em_tot_solar")]
    pub sold_energy_topic: String,

    /// Topic carrying the purchased energy counter in kWh
    #[arg(
        long,
        env = "MQTT_PURCHASED_ENERGY_TOPIC",
        default_value = "dev37/r/em_tot_grid"
    )]
    pub purchased_energy_topic: String,

    /// MQTT client id
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "grid-bridge")]
    pub client_id: String,

    /// MQTT username
    #[arg(long, env = "MQTT_USERNAME", default_value = "ha")]
    pub username: String,

    /// MQTT password
    #[arg(long, env = "MQTT_PASSWORD", default_value = "ah", hide_env_values = true)]
    pub password: String,

    /// Bus to register the grid meter on
    #[arg(long, env = "DBUS_BUS", value_enum, default_value_t = BusKind::System)]
    pub bus: BusKind,
}
