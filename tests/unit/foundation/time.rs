use super::*;

#[test]
fn frame_rate_validation() {
    assert!(FrameRate::new(25, 1).is_ok());
    assert!(FrameRate::new(0, 1).is_err());
    assert!(FrameRate::new(25, 0).is_err());
    assert_eq!(FrameRate::parse("30000/1001").unwrap().den, 1001);
    assert_eq!(FrameRate::parse("25").unwrap(), FrameRate { num: 25, den: 1 });
    assert!(FrameRate::parse("abc").is_err());
}

#[test]
fn frame_offsets_do_not_drift() {
    let ntsc = FrameRate::new(30000, 1001).unwrap();
    assert_eq!(ntsc.frame_offset(0), Offset(0));
    assert_eq!(ntsc.frame_offset(30000), Offset(1001 * 1_000_000));
    assert_eq!(FrameRate::new(25, 1).unwrap().frame_duration(), Offset(40_000));
}

#[test]
fn time_arithmetic_saturates() {
    assert_eq!(TimeValue::NEVER + Offset(5), TimeValue::NEVER);
    assert_eq!(TimeValue::ANYTIME - Offset(5), TimeValue::ANYTIME);
    assert_eq!(
        TimeValue(1_500).offset_since(TimeValue(500)),
        Offset::from_millis(1)
    );
    assert_eq!(TimeValue::from_secs_f64(0.25), TimeValue(250_000));
}

#[test]
fn manual_clock_moves_only_on_request() {
    let clock = ManualClock::new(TimeValue(10));
    assert_eq!(clock.now(), TimeValue(10));
    clock.advance(Offset(5));
    assert_eq!(clock.now(), TimeValue(15));
    clock.set(TimeValue(3));
    assert_eq!(clock.now(), TimeValue(3));
}

#[test]
fn real_clock_is_monotonic() {
    let clock = RealClock::new();
    let a = clock.now();
    let b = clock.now();
    assert!(b >= a);
}
