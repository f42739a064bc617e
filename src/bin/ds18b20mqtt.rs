// bin/ds18b20mqtt.rs

#[cfg(target_os = "espidf")]
mod firmware {
    use ds18b20mqtt::*;
    use esp_idf_hal::{delay::FreeRtos, gpio::IOPin, prelude::Peripherals};
    use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs};
    use esp_idf_sys::esp_app_desc;
    use log::*;

    esp_app_desc!();

    pub fn main() -> anyhow::Result<()> {
        esp_idf_sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();

        info!("Hello.");
        info!("Starting up, firmware version {FW_VERSION}");

        let config = MyConfig::default();
        config.validate()?;
        info!("My config:\n{config:#?}");

        let sysloop = EspSystemEventLoop::take()?;
        let nvs_default_partition = nvs::EspDefaultNvsPartition::take()?;

        let peripherals = Peripherals::take()?;
        let pins = peripherals.pins;

        #[cfg(feature = "esp32s")]
        let onewire_pin = pins.gpio19.downgrade();

        #[cfg(all(feature = "esp32c3", not(feature = "esp32s")))]
        let onewire_pin = pins.gpio4.downgrade();

        let bus = OneWireBus::new(onewire_pin)?;
        let link = WifiLink::new(peripherals.modem, sysloop, Some(nvs_default_partition))?;
        let session = MqttSession::new(&config);

        let mut station = Station::new(&config, link, session, bus, FreeRtos, SystemClock::new());
        station.run()
    }
}

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    firmware::main()
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!(
        "{} {} only runs on an ESP-IDF target",
        env!("CARGO_BIN_NAME"),
        ds18b20mqtt::FW_VERSION
    )
}

// EOF
