//! WinRT BLE backend
//!
//! Implements [`RadioTransport`] on top of the Windows GATT APIs. Every
//! radio round-trip runs in a spawned task that awaits the WinRT operation
//! and reports back as a [`RadioEvent`]; the trait methods themselves never
//! wait on the radio.
//!
//! The shared [`Link`] remembers which generation owns it. A task that
//! finishes after its link was released closes what it opened instead of
//! storing it.

use crate::infrastructure::bluetooth::registry::{
    DiscoveredEndpoint, DiscoveredService, EndpointAddress, EndpointHandle, EndpointProperties,
};
use crate::infrastructure::bluetooth::transport::{
    DeviceId, Generation, LinkStatus, RadioEvent, RadioEventSender, RadioTransport,
    ScannedDevice,
};
use crate::infrastructure::error::TransportError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus, GattSession,
    GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

#[derive(Default)]
struct Link {
    /// Owner of the link being opened or held, `None` once released
    generation: Option<Generation>,
    device: Option<BluetoothLEDevice>,
    session: Option<GattSession>,
    status_token: Option<i64>,
    characteristics: HashMap<EndpointAddress, GattCharacteristic>,
    value_tokens: HashMap<EndpointAddress, i64>,
    /// Descriptor writes that have to land before the device is closed
    pending: Vec<JoinHandle<()>>,
}

impl Link {
    fn is_current(&self, generation: Generation) -> bool {
        self.generation == Some(generation)
    }

    fn adopt(&mut self, opened: OpenedDevice) {
        self.device = Some(opened.device);
        self.session = Some(opened.session);
        self.status_token = Some(opened.status_token);
    }

    fn remove_value_handlers(&mut self) {
        for (address, token) in self.value_tokens.drain() {
            if let Some(characteristic) = self.characteristics.get(&address) {
                let _ = characteristic.RemoveValueChanged(token);
            }
        }
    }
}

type SharedLink = Arc<Mutex<Link>>;

/// Run `update` only while `generation` still owns the link
fn with_current(link: &SharedLink, generation: Generation, update: impl FnOnce(&mut Link)) -> bool {
    match link.lock() {
        Ok(mut guard) if guard.is_current(generation) => {
            update(&mut guard);
            true
        }
        _ => false,
    }
}

struct OpenedDevice {
    device: BluetoothLEDevice,
    session: GattSession,
    status_token: i64,
}

impl OpenedDevice {
    fn close(self) {
        close_handles(&self.device, Some(self.session), Some(self.status_token));
    }
}

fn close_handles(device: &BluetoothLEDevice, session: Option<GattSession>, status_token: Option<i64>) {
    if let Some(token) = status_token {
        let _ = device.RemoveConnectionStatusChanged(token);
    }
    if let Some(session) = session {
        let _ = session.Close();
    }
    if let Err(e) = device.Close() {
        debug!("Device close reported: {}", e);
    }
}

pub struct WinRtRadio {
    events: Option<RadioEventSender>,
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    link: SharedLink,
}

impl WinRtRadio {
    pub fn new() -> Self {
        Self {
            events: None,
            watcher: None,
            link: Arc::new(Mutex::new(Link::default())),
        }
    }

    fn events(&self) -> Result<RadioEventSender, TransportError> {
        self.events
            .clone()
            .ok_or_else(|| TransportError::Unavailable("transport not attached".to_string()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Link>, TransportError> {
        self.link
            .lock()
            .map_err(|_| TransportError::Unavailable("link lock poisoned".to_string()))
    }

    /// Characteristic of the current link, with the generation to tag its events
    fn characteristic(
        &self,
        address: &EndpointAddress,
    ) -> Result<(Generation, GattCharacteristic), TransportError> {
        let link = self.lock()?;
        let generation = link.generation.ok_or(TransportError::NotConnected)?;
        let characteristic = link
            .characteristics
            .get(address)
            .cloned()
            .ok_or(TransportError::NotConnected)?;
        Ok((generation, characteristic))
    }
}

impl Default for WinRtRadio {
    fn default() -> Self {
        Self::new()
    }
}

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

fn parse_address(id: &DeviceId) -> Result<u64, TransportError> {
    let hex = id.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(hex, 16)
        .map_err(|e| TransportError::Connect(format!("bad device address {}: {}", id, e)))
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

fn read_err(e: windows::core::Error) -> TransportError {
    TransportError::Read(e.to_string())
}

fn write_err(e: windows::core::Error) -> TransportError {
    TransportError::Write(e.to_string())
}

fn notify_err(e: windows::core::Error) -> TransportError {
    TransportError::Notify(e.to_string())
}

fn discovery_err(e: windows::core::Error) -> TransportError {
    TransportError::Discovery(e.to_string())
}

async fn open_device(
    address: u64,
    generation: Generation,
    events: RadioEventSender,
) -> windows::core::Result<OpenedDevice> {
    let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?.await?;
    info!("Device opened: {:?}", device.Name()?);

    // Keep the link up while we hold the session
    let session = GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.await?;
    session.SetMaintainConnection(true)?;

    let status_handler =
        TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
            if let Some(dev) = dev.as_ref() {
                if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                    let _ = events.send(RadioEvent::ConnectionChanged {
                        generation,
                        success: true,
                        link: LinkStatus::Disconnected,
                    });
                }
            }
            Ok(())
        });
    let status_token = device.ConnectionStatusChanged(&status_handler)?;

    Ok(OpenedDevice {
        device,
        session,
        status_token,
    })
}

async fn discover(
    device: &BluetoothLEDevice,
) -> Result<(Vec<DiscoveredService>, HashMap<EndpointAddress, GattCharacteristic>), TransportError> {
    let mut services = Vec::new();
    let mut characteristics = HashMap::new();

    let services_result = device
        .GetGattServicesAsync()
        .map_err(discovery_err)?
        .await
        .map_err(discovery_err)?;
    let status = services_result.Status().map_err(discovery_err)?;
    if status != GattCommunicationStatus::Success {
        return Err(TransportError::Discovery(format!(
            "GATT services status {:?}",
            status
        )));
    }

    let gatt_services = services_result.Services().map_err(discovery_err)?;
    for i in 0..gatt_services.Size().map_err(discovery_err)? {
        let service = gatt_services.GetAt(i).map_err(discovery_err)?;
        let service_id = to_uuid(service.Uuid().map_err(discovery_err)?);
        let chars_result = service
            .GetCharacteristicsAsync()
            .map_err(discovery_err)?
            .await
            .map_err(discovery_err)?;
        let status = chars_result.Status().map_err(discovery_err)?;
        if status != GattCommunicationStatus::Success {
            warn!("Skipping service {}: {:?}", service_id, status);
            continue;
        }

        let mut endpoints = Vec::new();
        let gatt_chars = chars_result.Characteristics().map_err(discovery_err)?;
        for j in 0..gatt_chars.Size().map_err(discovery_err)? {
            let c = gatt_chars.GetAt(j).map_err(discovery_err)?;
            let id = to_uuid(c.Uuid().map_err(discovery_err)?);
            let props = c.CharacteristicProperties().map_err(discovery_err)?;
            endpoints.push(DiscoveredEndpoint {
                id,
                properties: EndpointProperties {
                    read: props.contains(GattCharacteristicProperties::Read),
                    write: props.contains(GattCharacteristicProperties::Write)
                        || props.contains(GattCharacteristicProperties::WriteWithoutResponse),
                    notify: props.contains(GattCharacteristicProperties::Notify),
                },
            });
            characteristics.insert(EndpointAddress::new(service_id, id), c);
        }

        services.push(DiscoveredService {
            id: service_id,
            endpoints,
        });
    }

    Ok((services, characteristics))
}

async fn read_value(characteristic: &GattCharacteristic) -> Result<Vec<u8>, TransportError> {
    let read = characteristic
        .ReadValueAsync()
        .map_err(read_err)?
        .await
        .map_err(read_err)?;
    let status = read.Status().map_err(read_err)?;
    if status != GattCommunicationStatus::Success {
        return Err(TransportError::Read(format!("{:?}", status)));
    }
    read_buffer(&read.Value().map_err(read_err)?).map_err(read_err)
}

async fn write_value(characteristic: &GattCharacteristic, value: &[u8]) -> Result<(), TransportError> {
    let writer = DataWriter::new().map_err(write_err)?;
    writer.WriteBytes(value).map_err(write_err)?;
    let buffer = writer.DetachBuffer().map_err(write_err)?;

    let status = characteristic
        .WriteValueAsync(&buffer)
        .map_err(write_err)?
        .await
        .map_err(write_err)?;
    match status {
        GattCommunicationStatus::Success => Ok(()),
        status => Err(TransportError::Write(format!("{:?}", status))),
    }
}

async fn write_descriptor(
    characteristic: &GattCharacteristic,
    value: GattClientCharacteristicConfigurationDescriptorValue,
) -> Result<(), TransportError> {
    let status = characteristic
        .WriteClientCharacteristicConfigurationDescriptorAsync(value)
        .map_err(notify_err)?
        .await
        .map_err(notify_err)?;
    if status != GattCommunicationStatus::Success {
        return Err(TransportError::Notify(format!("{:?}", status)));
    }
    Ok(())
}

impl RadioTransport for WinRtRadio {
    fn attach(&mut self, events: RadioEventSender) {
        self.events = Some(events);
    }

    fn start_scan(&mut self) -> Result<(), TransportError> {
        self.stop_scan()?;
        let sender = self.events()?;
        let scan_err = |e: windows::core::Error| TransportError::Scan(e.to_string());

        let watcher = BluetoothLEAdvertisementWatcher::new().map_err(scan_err)?;
        watcher
            .SetScanningMode(BluetoothLEScanningMode::Active)
            .map_err(scan_err)?;

        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    let address = args.BluetoothAddress()?;
                    let rssi = args.RawSignalStrengthInDBm()?;

                    let _ = sender.send(RadioEvent::DeviceFound(ScannedDevice {
                        id: format!("{:#X}", address),
                        name: (!name.is_empty()).then_some(name),
                        signal_strength: Some(rssi),
                    }));
                }
                Ok(())
            },
        );

        watcher.Received(&handler).map_err(scan_err)?;
        watcher.Start().map_err(scan_err)?;
        info!("BLE scan started");
        self.watcher = Some(watcher);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        if let Some(watcher) = self.watcher.take() {
            info!("Stopping BLE scan...");
            watcher
                .Stop()
                .map_err(|e| TransportError::Scan(e.to_string()))?;
        }
        Ok(())
    }

    fn connect(&mut self, device: &DeviceId, generation: Generation) -> Result<(), TransportError> {
        let address = parse_address(device)?;
        let events = self.events()?;
        self.lock()?.generation = Some(generation);
        let link = self.link.clone();

        tokio::spawn(async move {
            let success = match open_device(address, generation, events.clone()).await {
                Ok(opened) => {
                    let mut opened = Some(opened);
                    with_current(&link, generation, |link| {
                        if let Some(opened) = opened.take() {
                            link.adopt(opened);
                        }
                    });
                    if let Some(stale) = opened {
                        debug!("Link {} released while opening, closing device", generation);
                        stale.close();
                        return;
                    }
                    true
                }
                Err(e) => {
                    warn!("Failed to open device {:#X}: {}", address, e);
                    false
                }
            };
            let _ = events.send(RadioEvent::ConnectionChanged {
                generation,
                success,
                link: if success {
                    LinkStatus::Connected
                } else {
                    LinkStatus::Disconnected
                },
            });
        });
        Ok(())
    }

    fn discover_services(&mut self, generation: Generation) -> Result<(), TransportError> {
        let events = self.events()?;
        let device = {
            let link = self.lock()?;
            if !link.is_current(generation) {
                return Err(TransportError::NotConnected);
            }
            link.device.clone().ok_or(TransportError::NotConnected)?
        };
        let link = self.link.clone();

        tokio::spawn(async move {
            let result = match discover(&device).await {
                Ok((services, characteristics)) => {
                    let mut found = Some(characteristics);
                    let kept = with_current(&link, generation, |link| {
                        link.characteristics = found.take().unwrap_or_default();
                    });
                    if !kept {
                        debug!("Link {} released during discovery", generation);
                        return;
                    }
                    Ok(services)
                }
                Err(e) => Err(e),
            };
            let _ = events.send(RadioEvent::ServicesDiscovered { generation, result });
        });
        Ok(())
    }

    fn read(&mut self, endpoint: &EndpointHandle) -> Result<(), TransportError> {
        let events = self.events()?;
        let (generation, characteristic) = self.characteristic(&endpoint.address)?;
        let address = endpoint.address;

        tokio::spawn(async move {
            let result = read_value(&characteristic).await;
            let _ = events.send(RadioEvent::ReadCompleted {
                generation,
                endpoint: address,
                result,
            });
        });
        Ok(())
    }

    fn write(&mut self, endpoint: &EndpointHandle, value: &[u8]) -> Result<(), TransportError> {
        let events = self.events()?;
        let (generation, characteristic) = self.characteristic(&endpoint.address)?;
        let address = endpoint.address;
        let value = value.to_vec();

        tokio::spawn(async move {
            let result = write_value(&characteristic, &value).await;
            let _ = events.send(RadioEvent::WriteCompleted {
                generation,
                endpoint: address,
                result,
            });
        });
        Ok(())
    }

    fn set_notifications(
        &mut self,
        endpoint: &EndpointHandle,
        enabled: bool,
    ) -> Result<(), TransportError> {
        let events = self.events()?;
        let (generation, characteristic) = self.characteristic(&endpoint.address)?;
        let address = endpoint.address;
        let mut link = self.lock()?;

        if enabled {
            let sender = events.clone();
            let handler = TypedEventHandler::new(
                move |_: windows::core::Ref<GattCharacteristic>,
                      args: windows::core::Ref<GattValueChangedEventArgs>| {
                    if let Some(args) = args.as_ref() {
                        let value = read_buffer(&args.CharacteristicValue()?)?;
                        let _ = sender.send(RadioEvent::Notification {
                            generation,
                            endpoint: address,
                            value,
                        });
                    }
                    Ok(())
                },
            );
            let token = characteristic.ValueChanged(&handler).map_err(notify_err)?;
            if let Some(previous) = link.value_tokens.insert(address, token) {
                let _ = characteristic.RemoveValueChanged(previous);
            }
        } else if let Some(token) = link.value_tokens.remove(&address) {
            let _ = characteristic.RemoveValueChanged(token);
        }

        let descriptor = if enabled {
            GattClientCharacteristicConfigurationDescriptorValue::Notify
        } else {
            GattClientCharacteristicConfigurationDescriptorValue::None
        };
        link.pending.retain(|task| !task.is_finished());
        link.pending.push(tokio::spawn(async move {
            let result = write_descriptor(&characteristic, descriptor).await;
            let _ = events.send(RadioEvent::NotificationsChanged {
                generation,
                endpoint: address,
                enabled,
                result,
            });
        }));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let (device, session, pending) = {
            let mut guard = self.lock()?;
            let link = &mut *guard;
            let device = link.device.take().ok_or(TransportError::NotConnected)?;
            link.remove_value_handlers();
            // A link being closed on purpose must not report itself as lost
            if let Some(token) = link.status_token.take() {
                let _ = device.RemoveConnectionStatusChanged(token);
            }
            (device, link.session.take(), std::mem::take(&mut link.pending))
        };

        tokio::spawn(async move {
            for task in pending {
                let _ = task.await;
            }
            close_handles(&device, session, None);
            debug!("Link closed");
        });
        Ok(())
    }

    fn release(&mut self) {
        let Ok(mut guard) = self.link.lock() else {
            return;
        };
        let link = &mut *guard;

        link.generation = None;
        link.remove_value_handlers();
        link.characteristics.clear();
        if let Some(device) = link.device.take() {
            close_handles(&device, link.session.take(), link.status_token.take());
        }
        link.session = None;
        link.status_token = None;
        link.pending.clear();
    }
}

impl Drop for WinRtRadio {
    fn drop(&mut self) {
        let _ = self.stop_scan();
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_link_refuses_late_results() {
        let link: SharedLink = Arc::new(Mutex::new(Link::default()));
        link.lock().unwrap().generation = Some(3);

        assert!(with_current(&link, 3, |_| {}));
        assert!(!with_current(&link, 2, |_| {}));

        // Released while a connect for generation 3 was still running
        let mut radio = WinRtRadio {
            events: None,
            watcher: None,
            link: link.clone(),
        };
        radio.release();
        let mut touched = false;
        assert!(!with_current(&link, 3, |_| touched = true));
        assert!(!touched);
        assert_eq!(link.lock().unwrap().generation, None);
    }

    #[test]
    fn test_device_address_parsing() {
        assert_eq!(parse_address(&"0xAABBCCDDEEFF".to_string()).unwrap(), 0xAABBCCDDEEFF);
        assert!(parse_address(&"tank".to_string()).is_err());
    }
}
