// Copyright (c) 2019 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

use opensbp::parse;

#[test]
fn test_parse() {
    let src = "' Try to exercise as much of the syntax as possible.
VS,5,3

MX 10
my,-0.5
M2,1,2.5
JH
JZ,1 ' trailing comments are dropped
&depth = +1.
&msg = plain text here
&a = (1 + 2) * 3
loop:
MZ,&depth * 2
IF &depth <= 1 THEN GOTO loop
CG,,1,1,0,1,T,1,0.25,4,1,1,0,0,0
PAUSE 1.5
PAUSE
GOSUB sub
END
sub:
ZX
RETURN
";

    let parsed = "' Try to exercise as much of the syntax as possible.
VS,5,3

MX,10
MY,-0.5
M2,1,2.5
JH
JZ,1
&depth = 1
&msg = plain text here
&a = (1 + 2) * 3
loop:
MZ,&depth * 2
IF &depth <= 1 THEN GOTO loop
CG,,1,1,0,1,T,1,0.25,4,1,1,0,0,0
PAUSE 1.5
PAUSE
GOSUB sub
END
sub:
ZX
RETURN
";

    let prog = parse::parse("testfile", src).unwrap();
    println!("{:?}", prog);

    assert_eq!(prog.to_string(), parsed);
}

#[test]
fn test_lines_stay_in_lockstep() {
    let src = "MX,1\n\n' comment\nMY,2\n";
    let prog = parse::parse("testfile", src).unwrap();
    assert_eq!(prog.lines.len(), 4);
    for (i, line) in prog.lines.iter().enumerate() {
        assert_eq!(line.lineno, i + 1);
    }
}

#[test]
fn test_invalid() {
    for snippet in &[
        "$",    // invalid characters
        "M",    // half a mnemonic
        "GOTO", // branch without a target
        "&a",   // assignment without a value
        "%(1",  // unclosed system variable
    ] {
        assert!(parse::parse("testfile", snippet).is_err(), "snippet: {}", snippet);
    }
}
