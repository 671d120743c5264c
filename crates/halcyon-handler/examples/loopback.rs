use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use halcyon_core::config::ConfigBuilder;
use halcyon_devices::device::Result as DeviceResult;
use halcyon_devices::{
    Adapter, AdapterConfig, AdapterHandle, AdapterKind, AdapterLink, AdapterOptions, Device, InMemoryDirectory,
    SubsystemId,
};
use halcyon_handler::{spawn_handler, CallOutcome, DataOutcome, DeviceHandler, Discovery, HandlerOptions};

/// Adapter that answers every payload it is sent with the same payload
#[derive(Debug)]
struct LoopbackKind;

#[derive(Debug)]
struct Loopback {
    link: AdapterLink,
    prefix: String,
}

#[async_trait]
impl Adapter for Loopback {
    async fn connect(&mut self, device: &Device) -> DeviceResult<()> {
        println!("loopback: attached to {}", device);
        Ok(())
    }

    async fn send(&mut self, payload: Bytes) -> DeviceResult<()> {
        let mut echoed = self.prefix.clone().into_bytes();
        echoed.extend_from_slice(&payload);
        self.link.deliver(echoed);
        Ok(())
    }
}

#[async_trait]
impl AdapterKind for LoopbackKind {
    fn name(&self) -> &str {
        "loopback"
    }

    fn subsystem(&self) -> SubsystemId {
        SubsystemId::new("loop")
    }

    async fn start(&self, options: &AdapterOptions, link: AdapterLink) -> DeviceResult<Box<dyn Adapter>> {
        let prefix = options.get_string("prefix").unwrap_or_default();
        Ok(Box::new(Loopback { link, prefix }))
    }
}

/// Handler that pings the first device it sees and keeps the last echo
#[derive(Debug, Default)]
struct Pinger {
    log: Mutex<Vec<String>>,
}

#[async_trait]
impl DeviceHandler for Pinger {
    type State = Option<String>;
    type Call = ();
    type Reply = Option<String>;
    type Cast = ();

    async fn on_discover(&self, device: &Device, state: Self::State) -> anyhow::Result<Discovery<Self::State>> {
        self.log.lock().unwrap().push(format!("discovered {}", device));
        Ok(Discovery::Connect(state))
    }

    async fn on_connect(&self, _device: &Device, adapter: &AdapterHandle, state: Self::State) -> anyhow::Result<Self::State> {
        adapter.send(&b"ping"[..]).await?;
        Ok(state)
    }

    async fn on_data(
        &self,
        device: &Device,
        _adapter: &AdapterHandle,
        payload: Bytes,
        _state: Self::State,
    ) -> anyhow::Result<DataOutcome<Self::State>> {
        let text = String::from_utf8_lossy(&payload).to_string();
        self.log.lock().unwrap().push(format!("{} answered {}", device, text));
        Ok(DataOutcome::Continue(Some(text)))
    }

    async fn on_disconnect(&self, device: &Device, state: Self::State) -> anyhow::Result<Self::State> {
        self.log.lock().unwrap().push(format!("lost {}", device));
        Ok(state)
    }

    async fn on_call(&self, _request: (), state: Self::State) -> anyhow::Result<CallOutcome<Self::Reply, Self::State>> {
        Ok(CallOutcome::Reply(state.clone(), state))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigBuilder::new().with_environment_prefix("HALCYON").build()?;
    halcyon_core::init(&config)?;

    let directory = Arc::new(InMemoryDirectory::with_capacity(config.handler.directory_capacity));
    directory.add_device(Device::new("loop0", "loop").with_metadata("vendor", "acme"))?;

    let adapter = AdapterConfig::new(
        Arc::new(LoopbackKind),
        AdapterOptions::new().with_option("prefix", "pong:"),
    );
    let options = HandlerOptions::from_config("pinger", &config.handler);

    let running = spawn_handler(Pinger::default(), adapter, None, directory.clone(), options).await?;
    let handle = running.handle().clone();

    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("status: {:?}", handle.status().await?);
    println!("last echo: {:?}", handle.call((), None).await?);

    directory.remove_device(&SubsystemId::new("loop"), &"loop0".into())?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("status after removal: {:?}", handle.status().await?.status);

    handle.stop("demo finished").await?;
    println!("handler ended: {}", running.join().await?);

    Ok(())
}
