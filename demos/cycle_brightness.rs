//! Demo: load the driver and step the backlight through a few levels.
//!
//! Run with: `sudo cargo run --example cycle_brightness`

use openframe_bl::{
    BacklightClass, BacklightError, BlankState, DRIVER_NAME, DevMemMapper, OpenframeDriver,
    OpenframeModule, SimplePlatformBus, SysfsPciBus,
};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

fn main() -> Result<(), BacklightError> {
    // Initialize logging (optional)
    env_logger::init();

    let class = Arc::new(BacklightClass::new());
    let driver = Arc::new(OpenframeDriver::new(
        Arc::new(SysfsPciBus::new()),
        Arc::new(DevMemMapper::new()),
        class.clone(),
    ));
    let module = OpenframeModule::init(Arc::new(SimplePlatformBus::new()), driver)?;

    if class.device_names().is_empty() {
        eprintln!("No Openframe backlight found");
        return Ok(());
    }

    let max = class.max_brightness(DRIVER_NAME)?;
    for level in [max, max / 2, max / 4, max] {
        class.set_brightness(DRIVER_NAME, level)?;
        println!(
            "brightness={} actual={}",
            level,
            class.actual_brightness(DRIVER_NAME)?
        );
        sleep(Duration::from_millis(500));
    }

    // Blank and restore
    class.set_fb_blank(DRIVER_NAME, BlankState::Powerdown)?;
    sleep(Duration::from_millis(500));
    class.set_fb_blank(DRIVER_NAME, BlankState::Unblank)?;

    module.exit();
    Ok(())
}
