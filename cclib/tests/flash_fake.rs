use cclib::chip::{attach, AttachOptions, ChipDriver};
use cclib::flashing::{FlashError, FlashProgress, FlashStrategy, ProgressEvent, WriteOptions};
use cclib::image::{self, Format, MemoryImage};
use cclib::probe::fake_probe::{FakeAdapter, FakeChip};
use cclib::vendor::bluegiga::{self, BleInfo};
use cclib::{Error, ErrorClass};
use std::sync::{Arc, Mutex};

const FIRMWARE: &str = "\
:10000000020100FFFFFFFFFFFFFFFFFFFFFFFFFFFA
:10010000214601360121470136007EFE09D2190140
:10050000214601360121470136007EFE09D219013C
:00000001FF
";

fn attached(chip: FakeChip) -> (FakeAdapter, Box<dyn ChipDriver>) {
    let adapter = FakeAdapter::new(chip);
    let options = AttachOptions {
        enter_debug: true,
        ..Default::default()
    };
    let driver = attach(adapter.proxy(), &options).expect("Failed to attach with the fake adapter.");
    (adapter, driver)
}

fn flash_image(driver: &mut dyn ChipDriver, image: &MemoryImage, options: &WriteOptions<'_>) {
    driver.pause_dma(false).expect("Failed to unpause DMA");
    for block in image.blocks() {
        driver
            .write_code(block.address(), block.data(), options)
            .expect("Failed to flash block");
    }
}

fn read_back(driver: &mut dyn ChipDriver, image: &MemoryImage) -> MemoryImage {
    let mut copy = MemoryImage::new();
    for block in image.blocks() {
        let data = driver
            .read_code(block.address(), block.len())
            .expect("Failed to read flash");
        copy.set(block.address(), &data);
    }
    copy
}

#[test]
fn hex_file_to_cc2541_and_back() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("firmware.hex");
    std::fs::write(&input, FIRMWARE).unwrap();

    let firmware = image::load(&input, None).unwrap();
    assert_eq!(firmware.block_count(), 3);

    let (_adapter, mut driver) = attached(FakeChip::cc2541());
    flash_image(driver.as_mut(), &firmware, &WriteOptions::default());

    let copy = read_back(driver.as_mut(), &firmware);
    let output = dir.path().join("readback.hex");
    image::save(&copy, &output, None).unwrap();

    assert_eq!(image::load(&output, Some(Format::Hex)).unwrap(), firmware);
}

#[test]
fn full_flash_dump_as_binary() {
    let dir = tempfile::tempdir().unwrap();
    let (adapter, mut driver) = attached(FakeChip::cc2510());
    adapter.with(|chip| chip.flash_mut()[0x3FF0..].fill(0x42));

    let mut dump = MemoryImage::new();
    let flash_size = driver.flash_size();
    for offset in (0..flash_size).step_by(0x1000) {
        dump.stack(&driver.read_code(offset, 0x1000).unwrap());
    }

    let output = dir.path().join("dump.bin");
    image::save(&dump, &output, None).unwrap();

    let bytes = std::fs::read(&output).unwrap();
    assert_eq!(bytes.len(), 0x4000);
    assert_eq!(&bytes[0x3FF0..], &[0x42; 0x10]);
    assert_eq!(bytes.as_slice(), adapter.with(|chip| chip.flash().to_vec()).as_slice());
}

#[test]
fn cc2510_routine_writes_an_image() {
    let firmware = image::hex::decode(FIRMWARE).unwrap();
    let (_adapter, mut driver) = attached(FakeChip::cc2510());
    let options = WriteOptions {
        strategy: FlashStrategy::Routine,
        ..Default::default()
    };

    flash_image(driver.as_mut(), &firmware, &options);

    assert_eq!(read_back(driver.as_mut(), &firmware), firmware);
}

#[test]
fn progress_is_reported_per_chunk() {
    let events = Arc::new(Mutex::new(vec![]));
    let sink = events.clone();
    let progress = FlashProgress::new(move |event| sink.lock().unwrap().push(event));
    let options = WriteOptions {
        progress: Some(&progress),
        ..Default::default()
    };
    let (_adapter, mut driver) = attached(FakeChip::cc2541());

    driver.write_code(0x800, &[0x11; 0x900], &options).unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            ProgressEvent::Started {
                address: 0x800,
                total: 0x900
            },
            ProgressEvent::ChunkProgrammed {
                address: 0x800,
                size: 0x800
            },
            ProgressEvent::ChunkProgrammed {
                address: 0x1000,
                size: 0x100
            },
            ProgressEvent::Finished,
        ]
    );
}

#[test]
fn oversized_image_is_refused() {
    let (adapter, mut driver) = attached(FakeChip::cc2510());
    let frames = adapter.with(|chip| chip.frames());

    let error = driver
        .write_code(0x3F00, &[0; 0x200], &WriteOptions::default())
        .unwrap_err();

    assert!(matches!(error, FlashError::ImageTooLarge { .. }));
    assert_eq!(Error::from(error).class(), ErrorClass::FlashOperation);
    assert_eq!(adapter.with(|chip| chip.frames()), frames);
}

#[test]
fn bluegiga_info_survives_chip_erase() {
    let (adapter, mut driver) = attached(FakeChip::cc2540());
    let license = bluegiga::parse_license(&"5a".repeat(32)).unwrap();
    adapter.with(|chip| {
        let top = chip.flash().len();
        chip.flash_mut()[top - 57..top - 25].copy_from_slice(&license);
        chip.flash_mut()[top - 25] = 0x02;
    });

    let info = BleInfo::read(driver.as_mut()).unwrap();
    assert!(info.has_license());

    driver.proxy_mut().chip_erase().unwrap();
    assert!(!BleInfo::read(driver.as_mut()).unwrap().has_license());

    let mut firmware = image::hex::decode(FIRMWARE).unwrap();
    let flash_size = driver.flash_size();
    info.apply(&mut firmware, flash_size);
    flash_image(driver.as_mut(), &firmware, &WriteOptions::default());

    assert_eq!(BleInfo::read(driver.as_mut()).unwrap().license, license);
    assert_eq!(BleInfo::read(driver.as_mut()).unwrap().hardware_version, 0x02);
}
