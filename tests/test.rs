use axgpio_switch::layout::{CHANNEL1, GIER, GIER_ENABLE, IER, ISR};
use axgpio_switch::sim::SimHost;
use axgpio_switch::{
    BindState, GpioSwitchConfig, GpioSwitchDevice, GpioSwitchDriver, HostServices, HwDescription,
    IrqReturn, MemRegion, Pid, PinLevel, REGISTER_UAPP, ResourceDescriptor, UNREGISTER_UAPP,
};
use memory_addr::PhysAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const BASE: usize = 0x4120_0000;
const IRQ: u32 = 61;
const SIGNR: u32 = 44;

fn node() -> HwDescription {
    HwDescription::new("gpio@41200000", "gpio-ebaz-lkmTest02")
}

fn resources() -> ResourceDescriptor {
    ResourceDescriptor::new()
        .with_mem(MemRegion::new(PhysAddr::from(BASE), 0x1_0000))
        .with_irq(IRQ)
}

struct Bench {
    host: Arc<SimHost>,
    driver: GpioSwitchDriver,
    dev: Arc<GpioSwitchDevice>,
}

impl Bench {
    fn new() -> Self {
        let host = Arc::new(SimHost::new());
        let driver = GpioSwitchDriver::new(
            GpioSwitchConfig::default(),
            HostServices::from_host(host.clone()),
        );
        let dev = driver
            .attach(&node(), &resources())
            .expect("attach failed");
        Self { host, driver, dev }
    }

    fn register(&self, pid: Pid) {
        let major = self.dev.channel_major();
        self.host.open(major, pid).unwrap();
        self.host.ioctl(major, pid, REGISTER_UAPP).unwrap();
    }

    fn close(&self, pid: Pid) {
        self.host.close(self.dev.channel_major(), pid).unwrap();
    }

    fn edge(&self, level: u32) -> IrqReturn {
        assert!(self.host.block(PhysAddr::from(BASE)).raise_edge(level));
        self.host.fire(IRQ)
    }
}

#[test]
fn test_press_delivers_one_signal() {
    let bench = Bench::new();
    bench.register(Pid(100));

    assert_eq!(bench.edge(0), IrqReturn::WakeThread);

    assert_eq!(bench.host.signals(), vec![(Pid(100), SIGNR)]);
    assert_eq!(bench.dev.level(), PinLevel::Pressed);
    assert_eq!(bench.dev.stats().notifications(), 1);

    let block = bench.host.block(PhysAddr::from(BASE));
    assert_eq!(block.peek(ISR) & CHANNEL1, 0);
    assert_eq!(block.peek(GIER) & GIER_ENABLE, GIER_ENABLE);
    assert_eq!(block.peek(IER) & CHANNEL1, CHANNEL1);
}

#[test]
fn test_release_edge_is_silent() {
    let bench = Bench::new();
    bench.register(Pid(100));

    bench.edge(1);

    assert!(bench.host.signals().is_empty());
    assert_eq!(bench.dev.level(), PinLevel::Released);
    assert_eq!(bench.dev.stats().releases(), 1);
}

#[test]
fn test_latest_registration_wins() {
    let bench = Bench::new();
    bench.register(Pid(1));
    bench.register(Pid(2));

    bench.edge(0);

    assert_eq!(bench.host.signals(), vec![(Pid(2), SIGNR)]);
}

#[test]
fn test_close_deregisters() {
    let bench = Bench::new();
    bench.register(Pid(1));
    bench.close(Pid(1));
    assert_eq!(bench.dev.registered(), None);

    bench.edge(0);
    assert!(bench.host.signals().is_empty());
}

#[test]
fn test_replaced_holder_close_is_ignored() {
    let bench = Bench::new();
    bench.register(Pid(1));
    bench.register(Pid(2));
    bench.close(Pid(1));

    bench.edge(0);
    assert_eq!(bench.host.signals(), vec![(Pid(2), SIGNR)]);
}

#[test]
fn test_explicit_unregister() {
    let bench = Bench::new();
    bench.register(Pid(1));
    bench
        .host
        .ioctl(bench.dev.channel_major(), Pid(1), UNREGISTER_UAPP)
        .unwrap();

    bench.edge(0);
    assert!(bench.host.signals().is_empty());
}

#[test]
fn test_unknown_command_is_rejected() {
    let bench = Bench::new();
    let major = bench.dev.channel_major();
    assert!(bench.host.ioctl(major, Pid(1), 0xdead).is_err());
    assert_eq!(bench.dev.registered(), None);
}

#[test]
fn test_dead_consumer_keeps_device_armed() {
    let bench = Bench::new();
    bench.register(Pid(1));
    bench.host.kill(Pid(1));

    bench.edge(0);
    assert_eq!(bench.dev.stats().notify_errors(), 1);
    assert!(bench.host.signals().is_empty());

    bench.register(Pid(2));
    bench.edge(0);
    assert_eq!(bench.host.signals(), vec![(Pid(2), SIGNR)]);
}

#[test]
fn test_foreign_interrupt_on_shared_line() {
    let bench = Bench::new();
    bench.register(Pid(1));

    // Line fires without our status bit set.
    assert_eq!(bench.host.fire(IRQ), IrqReturn::None);
    assert_eq!(bench.dev.stats().spurious(), 1);
    assert!(bench.host.signals().is_empty());
}

#[test]
fn test_burst_is_coalesced() {
    let bench = Bench::new();
    bench.register(Pid(1));
    let block = bench.host.block(PhysAddr::from(BASE));

    block.raise_edge(1);
    assert_eq!(bench.host.fire_primary(IRQ), IrqReturn::WakeThread);
    block.raise_edge(0);
    assert_eq!(bench.host.fire_primary(IRQ), IrqReturn::Handled);

    assert_eq!(bench.host.run_threaded(IRQ), 1);
    assert_eq!(bench.host.signals(), vec![(Pid(1), SIGNR)]);
    assert_eq!(bench.dev.stats().coalesced(), 1);
}

#[test]
fn test_irq_failure_unmaps_before_returning() {
    let host = Arc::new(SimHost::new());
    host.fail_irq(true);
    let driver = GpioSwitchDriver::new(
        GpioSwitchConfig::default(),
        HostServices::from_host(host.clone()),
    );

    assert!(driver.attach(&node(), &resources()).is_err());
    assert!(!host.block(PhysAddr::from(BASE)).is_mapped());
    assert_eq!(host.mappings_live(), 0);
    assert_eq!(host.regions_held(), 0);
}

#[test]
fn test_edges_after_detach_are_not_handled() {
    let bench = Bench::new();
    bench.register(Pid(1));
    bench.driver.detach(&node());

    let block = bench.host.block(PhysAddr::from(BASE));
    // Disarmed: the block no longer latches edges.
    assert!(!block.raise_edge(0));
    assert_eq!(bench.host.fire(IRQ), IrqReturn::None);
    assert!(bench.host.signals().is_empty());
    assert_eq!(block.accesses_after_unmap(), 0);
}

#[test]
fn test_detach_waits_for_bottom_half() {
    let bench = Arc::new(Bench::new());
    bench.register(Pid(9));

    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    {
        let entered = entered.clone();
        let release = release.clone();
        bench.host.set_signal_hook(move |_| {
            entered.wait();
            release.wait();
        });
    }

    let irq_thread = {
        let bench = bench.clone();
        thread::spawn(move || bench.edge(0))
    };
    // Bottom half is now blocked inside signal delivery.
    entered.wait();

    let detached = Arc::new(AtomicBool::new(false));
    let detach_thread = {
        let bench = bench.clone();
        let detached = detached.clone();
        thread::spawn(move || {
            bench.driver.detach(&node());
            detached.store(true, Ordering::Release);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!detached.load(Ordering::Acquire));
    assert_eq!(bench.dev.state(), BindState::Unbinding);
    assert_eq!(bench.host.mappings_live(), 1);

    release.wait();
    assert_eq!(irq_thread.join().unwrap(), IrqReturn::WakeThread);
    detach_thread.join().unwrap();

    assert!(detached.load(Ordering::Acquire));
    assert_eq!(bench.dev.state(), BindState::Unbound);
    assert_eq!(bench.host.signals(), vec![(Pid(9), SIGNR)]);
    assert_eq!(bench.host.mappings_live(), 0);
    assert_eq!(bench.host.irqs_held(), 0);
    assert_eq!(bench.host.channels_held(), 0);
    assert_eq!(
        bench
            .host
            .block(PhysAddr::from(BASE))
            .accesses_after_unmap(),
        0
    );
}

#[test]
fn test_concurrent_edges() {
    const THREADS: usize = 4;
    const EDGES: usize = 200;

    let bench = Arc::new(Bench::new());
    bench.register(Pid(5));
    let block = bench.host.block(PhysAddr::from(BASE));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let bench = bench.clone();
            let block = block.clone();
            thread::spawn(move || {
                for _ in 0..EDGES {
                    block.raise_edge(0);
                    bench.host.fire_primary(IRQ);
                }
            })
        })
        .collect();
    let worker = {
        let bench = bench.clone();
        thread::spawn(move || {
            for _ in 0..EDGES {
                bench.host.run_threaded(IRQ);
                thread::yield_now();
            }
        })
    };
    for h in handles {
        h.join().unwrap();
    }
    worker.join().unwrap();
    bench.host.run_threaded(IRQ);

    let stats = bench.dev.stats();
    assert_eq!(stats.edges() + stats.spurious(), (THREADS * EDGES) as u64);
    assert!(stats.notifications() >= 1);
    assert_eq!(stats.notifications() as usize, bench.host.signals().len());
    assert_eq!(bench.host.run_threaded(IRQ), 0);
    assert_eq!(block.peek(ISR) & CHANNEL1, 0);
}

#[test]
fn test_module_unload_detaches_all() {
    let bench = Bench::new();
    bench.register(Pid(1));

    bench.driver.detach_all();

    assert_eq!(bench.driver.bound_count(), 0);
    assert_eq!(bench.dev.state(), BindState::Unbound);
    assert_eq!(bench.dev.registered(), None);
    assert_eq!(bench.host.regions_held(), 0);
    assert_eq!(bench.host.channels_held(), 0);
}
