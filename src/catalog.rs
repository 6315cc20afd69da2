use crate::property_store::{PropertyChange, PropertyStore, PropertyValue, StoreError};
use tokio::sync::mpsc::UnboundedSender;

// Venus OS consumers only pick up grid meters registered as com.victronenergy.grid.cgwacs_*
pub const SERVICE_NAME: &str = "com.victronenergy.grid.cgwacs_ttyUSB0_di30_mb1";

/// Identity of the emulated meter. These values never change once registered.
/// Layout follows https://github.com/victronenergy/venus/wiki/dbus#grid-meter
pub fn identity_properties() -> Vec<(&'static str, PropertyValue)> {
    use PropertyValue::{Int, Text};
    vec![
        ("/Connected", Int(1)),
        ("/CustomName", Text("Grid meter".to_string())),
        ("/DeviceInstance", Int(30)),
        ("/DeviceType", Int(71)),
        ("/ErrorCode", Int(0)),
        ("/FirmwareVersion", Int(2)),
        ("/Mgmt/Connection", Text("/dev/ttyUSB0".to_string())),
        (
            "/Mgmt/ProcessName",
            Text("/opt/color-control/dbus-cgwacs/dbus-cgwacs".to_string()),
        ),
        ("/Mgmt/ProcessVersion", Text("1.8.0".to_string())),
        ("/Position", Int(0)),
        ("/ProductId", Int(45058)),
        ("/ProductName", Text("Grid meter".to_string())),
        ("/Serial", Text("BP98305081235".to_string())),
    ]
}

/// Measurement paths and their units. All start at zero, and must stay floats:
/// systemcalc sums them and fails on mixed int/str values.
///
/// The first three are the aggregate paths the router writes to. They come on
/// top of the 15 per-phase grid meter paths, giving 18 dynamic objects.
pub const MEASUREMENTS: [(&str, &str); 18] = [
    ("/Ac/Power", "W"),
    ("/Ac/Energy/Forward", "kWh"),
    ("/Ac/Energy/Reverse", "kWh"),
    ("/Ac/L1/Power", "W"),
    ("/Ac/L2/Power", "W"),
    ("/Ac/L3/Power", "W"),
    ("/Ac/L1/Voltage", "V"),
    ("/Ac/L2/Voltage", "V"),
    ("/Ac/L3/Voltage", "V"),
    ("/Ac/L1/Current", "A"),
    ("/Ac/L2/Current", "A"),
    ("/Ac/L3/Current", "A"),
    ("/Ac/L1/Energy/Forward", "kWh"),
    ("/Ac/L2/Energy/Forward", "kWh"),
    ("/Ac/L3/Energy/Forward", "kWh"),
    ("/Ac/L1/Energy/Reverse", "kWh"),
    ("/Ac/L2/Energy/Reverse", "kWh"),
    ("/Ac/L3/Energy/Reverse", "kWh"),
];

/// Builds the store holding every identity and measurement path.
pub fn bootstrap_store(
    changes: UnboundedSender<PropertyChange>,
) -> Result<PropertyStore, StoreError> {
    let mut builder = PropertyStore::builder();
    for (path, value) in identity_properties() {
        builder.register_static(path, value)?;
    }
    for (path, unit) in MEASUREMENTS {
        builder.register_dynamic(path, 0.0, unit)?;
    }
    Ok(builder.build(changes))
}
