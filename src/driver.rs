//! Attach and detach of switch instances.
//!
//! Attach acquires, in order, the register region, its mapping, the
//! interrupt line and the control-channel identity, arming the peripheral
//! between the last two. Every acquisition is recorded on an [`Unwind`]
//! stack that releases everything in reverse order if a later step fails, so
//! a failed attach never leaves a resource behind.
//!
//! Detach is the reverse and is best-effort: a failing release step is
//! logged and the teardown carries on.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use arrayvec::ArrayVec;
use spin::RwLock;

use crate::channel::ControlChannel;
use crate::config::{COMPATIBLE, GpioSwitchConfig};
use crate::context::{DeviceContext, PinLevel, SwitchStats};
use crate::error::AttachError;
use crate::gpio;
use crate::host::{HostServices, IrqHandler};
use crate::irq::SwitchIrqHandler;
use crate::lifecycle::BindState;
use crate::registration::Pid;
use crate::resource::{HwDescription, MemRegion, ResourceDescriptor};

/// A bound switch instance.
pub struct GpioSwitchDevice {
    ctx: Arc<DeviceContext>,
    region: MemRegion,
    handler: Arc<dyn IrqHandler>,
    channel_major: u32,
}

impl GpioSwitchDevice {
    /// Hardware node name.
    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    /// Interrupt line owned by the instance.
    pub fn irq(&self) -> u32 {
        self.ctx.irq()
    }

    /// Major number the control channel was registered under.
    pub fn channel_major(&self) -> u32 {
        self.channel_major
    }

    /// Register region the instance was attached with.
    pub fn region(&self) -> MemRegion {
        self.region
    }

    /// Data value captured by the most recent edge.
    pub fn last_observed(&self) -> u32 {
        self.ctx.last_observed()
    }

    /// Classification of [`last_observed`](Self::last_observed).
    pub fn level(&self) -> PinLevel {
        PinLevel::classify(self.ctx.last_observed())
    }

    /// The registered consumer, if any.
    pub fn registered(&self) -> Option<Pid> {
        self.ctx.registration().holder()
    }

    /// Event counters.
    pub fn stats(&self) -> &SwitchStats {
        self.ctx.stats()
    }

    /// Binding state.
    pub fn state(&self) -> BindState {
        self.ctx.lifecycle().state()
    }

    /// Shared device state.
    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    fn teardown(&self, host: &HostServices, config: &GpioSwitchConfig) {
        let ctx = &self.ctx;
        let name = ctx.name();
        if !ctx.lifecycle().begin_unbind() {
            warn!("{}: detach already in progress", name);
            return;
        }
        ctx.lifecycle().wait_quiescent();

        if ctx.with_regs(|regs| regs.disarm()).is_none() {
            warn!("{}: no register window to disarm", name);
        }
        if let Err(e) = host.irq.free_irq(ctx.irq(), &self.handler) {
            warn!("{}: failed to free irq {}: {:?}", name, ctx.irq(), e);
        }
        if let Err(e) = host
            .chrdev
            .unregister_chrdev(self.channel_major, config.channel_name)
        {
            warn!(
                "{}: failed to unregister control channel {}: {:?}",
                name, self.channel_major, e
            );
        }
        if let Some(pid) = ctx.registration().clear() {
            debug!("{}: dropping registration of PID {}", name, pid);
        }
        match ctx.take_window() {
            Some(window) => {
                if let Err(e) = host.io.iounmap(window) {
                    warn!("{}: failed to unmap registers: {:?}", name, e);
                }
            }
            None => warn!("{}: register window already gone", name),
        }
        if let Err(e) = host.io.release_region(&self.region) {
            warn!("{}: failed to release {:?}: {:?}", name, self.region, e);
        }

        ctx.lifecycle().finish_unbind();
        info!("{}: detached", name);
    }
}

impl core::fmt::Debug for GpioSwitchDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GpioSwitchDevice")
            .field("ctx", &self.ctx)
            .field("region", &self.region)
            .field("channel_major", &self.channel_major)
            .finish()
    }
}

/// A resource taken during attach.
enum Acquired {
    Region(MemRegion),
    Mapping,
    Irq(u32, Arc<dyn IrqHandler>),
    Armed,
}

/// Releases what an attach attempt acquired, newest first, unless committed.
struct Unwind<'a> {
    host: &'a HostServices,
    ctx: &'a DeviceContext,
    stack: ArrayVec<Acquired, 4>,
}

impl<'a> Unwind<'a> {
    fn new(host: &'a HostServices, ctx: &'a DeviceContext) -> Self {
        Self {
            host,
            ctx,
            stack: ArrayVec::new(),
        }
    }

    fn push(&mut self, step: Acquired) {
        self.stack.push(step);
    }

    fn commit(mut self) {
        self.stack.clear();
    }
}

impl Drop for Unwind<'_> {
    fn drop(&mut self) {
        if self.stack.is_empty() {
            return;
        }
        let ctx = self.ctx;
        let name = ctx.name();
        let lifecycle = ctx.lifecycle();
        lifecycle.begin_unbind();
        lifecycle.wait_quiescent();

        while let Some(step) = self.stack.pop() {
            match step {
                Acquired::Armed => {
                    ctx.with_regs(|regs| regs.disarm());
                }
                Acquired::Irq(irq, handler) => {
                    if let Err(e) = self.host.irq.free_irq(irq, &handler) {
                        warn!("{}: rollback: failed to free irq {}: {:?}", name, irq, e);
                    }
                }
                Acquired::Mapping => {
                    if let Some(window) = ctx.take_window() {
                        if let Err(e) = self.host.io.iounmap(window) {
                            warn!("{}: rollback: failed to unmap: {:?}", name, e);
                        }
                    }
                }
                Acquired::Region(region) => {
                    if let Err(e) = self.host.io.release_region(&region) {
                        warn!("{}: rollback: failed to release {:?}: {:?}", name, region, e);
                    }
                }
            }
        }
        lifecycle.finish_unbind();
    }
}

/// The switch driver: binds instances to matching hardware nodes.
pub struct GpioSwitchDriver {
    config: GpioSwitchConfig,
    host: HostServices,
    devices: RwLock<BTreeMap<String, Arc<GpioSwitchDevice>>>,
}

impl GpioSwitchDriver {
    /// Creates a driver with no bound instance.
    pub fn new(config: GpioSwitchConfig, host: HostServices) -> Self {
        Self {
            config,
            host,
            devices: RwLock::new(BTreeMap::new()),
        }
    }

    /// The driver configuration.
    pub fn config(&self) -> &GpioSwitchConfig {
        &self.config
    }

    /// Returns `true` if `node` carries a compatible string the driver
    /// handles.
    pub fn matches(&self, node: &HwDescription) -> bool {
        node.compatible
            .iter()
            .any(|c| COMPATIBLE.contains(&c.as_str()))
    }

    /// Binds an instance to `node`.
    ///
    /// On error, everything acquired by this call has been released.
    pub fn attach(
        &self,
        node: &HwDescription,
        res: &ResourceDescriptor,
    ) -> Result<Arc<GpioSwitchDevice>, AttachError> {
        let name = node.name.as_str();
        if self.devices.read().contains_key(name) {
            error!("{}: already bound", name);
            return Err(AttachError::AlreadyBound);
        }

        let ctx = Arc::new(DeviceContext::new(
            node.name.clone(),
            self.config.signal,
            self.host.signal.clone(),
        ));
        let mut unwind = Unwind::new(&self.host, &ctx);

        let region = *res.mem(0).ok_or_else(|| {
            error!("{}: {}", name, AttachError::ResourceMissing);
            AttachError::ResourceMissing
        })?;
        self.host.io.request_region(&region, name).map_err(|e| {
            error!("{}: {} ({:?})", name, AttachError::RegionBusy, e);
            AttachError::RegionBusy
        })?;
        unwind.push(Acquired::Region(region));

        if !region.covers(gpio::BLOCK_SIZE) {
            error!(
                "{}: region of {:#x} bytes cannot hold the register block",
                name, region.size
            );
            return Err(AttachError::MapFailed);
        }
        let window = self.host.io.ioremap(&region).map_err(|e| {
            error!("{}: {} ({:?})", name, AttachError::MapFailed, e);
            AttachError::MapFailed
        })?;
        ctx.install_window(window);
        unwind.push(Acquired::Mapping);

        let irq = res.irq(0).ok_or_else(|| {
            error!("{}: {}", name, AttachError::IrqMissing);
            AttachError::IrqMissing
        })?;
        ctx.set_irq(irq);
        let handler: Arc<dyn IrqHandler> = Arc::new(SwitchIrqHandler::new(ctx.clone()));
        self.host
            .irq
            .request_threaded_irq(irq, handler.clone(), self.config.irq_flags, self.config.irq_name)
            .map_err(|e| {
                let err = AttachError::IrqRegistrationFailed(e);
                error!("{}: {}", name, err);
                err
            })?;
        unwind.push(Acquired::Irq(irq, handler.clone()));

        ctx.with_regs(|regs| regs.arm());
        unwind.push(Acquired::Armed);

        let ops = Arc::new(ControlChannel::new(ctx.registration().clone()));
        let channel_major = self
            .host
            .chrdev
            .register_chrdev(self.config.channel_major, self.config.channel_name, ops)
            .map_err(|e| {
                let err = AttachError::ChannelRegistrationFailed(e);
                error!("{}: {}", name, err);
                err
            })?;

        let device = Arc::new(GpioSwitchDevice {
            ctx: ctx.clone(),
            region,
            handler,
            channel_major,
        });
        {
            let mut devices = self.devices.write();
            if devices.contains_key(name) {
                // Lost a race with a concurrent attach of the same node.
                let _ = self
                    .host
                    .chrdev
                    .unregister_chrdev(channel_major, self.config.channel_name);
                error!("{}: already bound", name);
                return Err(AttachError::AlreadyBound);
            }
            devices.insert(node.name.clone(), device.clone());
        }
        unwind.commit();

        info!(
            "{}: attached, {:?} irq {} channel {} major {}",
            name, region, irq, self.config.channel_name, channel_major
        );
        Ok(device)
    }

    /// Unbinds the instance attached to `node`. Never fails.
    pub fn detach(&self, node: &HwDescription) {
        let device = self.devices.write().remove(&node.name);
        match device {
            Some(device) => device.teardown(&self.host, &self.config),
            None => warn!("{}: detach of unbound node", node.name),
        }
    }

    /// Unbinds every instance, as on module unload.
    pub fn detach_all(&self) {
        let devices: Vec<_> = {
            let mut map = self.devices.write();
            core::mem::take(&mut *map).into_values().collect()
        };
        for device in devices {
            device.teardown(&self.host, &self.config);
        }
    }

    /// The instance bound to node `name`.
    pub fn device(&self, name: &str) -> Option<Arc<GpioSwitchDevice>> {
        self.devices.read().get(name).cloned()
    }

    /// Number of bound instances.
    pub fn bound_count(&self) -> usize {
        self.devices.read().len()
    }
}
