// wifi.rs

use std::net::Ipv4Addr;

use embedded_svc::wifi::{ClientConfiguration, Configuration};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
};
use log::*;

use crate::*;

pub struct WifiLink<'a> {
    wifi: BlockingWifi<EspWifi<'a>>,
}

impl<'a> WifiLink<'a> {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> anyhow::Result<Self> {
        info!("Initializing Wi-Fi...");
        let espwifi = EspWifi::new(modem, sysloop.clone(), nvs)?;
        let wifi = BlockingWifi::wrap(espwifi, sysloop)?;
        Ok(Self { wifi })
    }

    fn configure(&mut self, ssid: &str, password: &str) -> Result<(), LinkError> {
        info!("WiFi setting credentials...");
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: ssid
                    .try_into()
                    .map_err(|_| LinkError::Credentials("ssid too long"))?,
                password: password
                    .try_into()
                    .map_err(|_| LinkError::Credentials("password too long"))?,
                ..Default::default()
            }))
            .map_err(driver_error)?;

        info!("WiFi driver starting...");
        self.wifi.start().map_err(driver_error)?;
        Ok(())
    }
}

fn driver_error(e: esp_idf_sys::EspError) -> LinkError {
    LinkError::Driver(format!("{e:?}"))
}

impl NetworkLink for WifiLink<'_> {
    fn connect(&mut self, ssid: &str, password: &str) -> Result<(), LinkError> {
        let steps = LinkSteps::plan(
            self.wifi.is_started().map_err(driver_error)?,
            self.wifi.is_connected().map_err(driver_error)?,
        );
        if steps.configure {
            self.configure(ssid, password)?;
        }
        if steps.associate {
            info!("WiFi connecting...");
            self.wifi.connect().map_err(driver_error)?;
        }

        info!("WiFi waiting for DHCP lease...");
        self.wifi.wait_netif_up().map_err(driver_error)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    fn local_address(&self) -> Ipv4Addr {
        self.wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .map(|info| info.ip)
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    fn hardware_address(&self) -> MacAddress {
        match self.wifi.wifi().sta_netif().get_mac() {
            Ok(mac) => MacAddress(mac),
            Err(e) => {
                error!("Cannot read station MAC: {e:?}");
                MacAddress::default()
            }
        }
    }
}

// EOF
