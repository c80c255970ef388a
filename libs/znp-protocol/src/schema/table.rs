//! Built-in command table
//!
//! Ids follow the Z-Stack MT interface specification.

use super::params::{p, ParamType::*};
use super::CommandDef;
use crate::frame::Subsystem;

static SYS: &[CommandDef] = &[
    CommandDef::areq("resetReq", 0x00, &[p("type", U8)]),
    CommandDef::sreq("ping", 0x01, &[], &[p("capabilities", U16)]),
    CommandDef::sreq(
        "version",
        0x02,
        &[],
        &[
            p("transportrev", U8),
            p("product", U8),
            p("majorrel", U8),
            p("minorrel", U8),
            p("maintrel", U8),
        ],
    ),
    CommandDef::sreq(
        "setExtAddr",
        0x03,
        &[p("extaddress", IeeeAddr)],
        &[p("status", U8)],
    ),
    CommandDef::sreq("getExtAddr", 0x04, &[], &[p("extaddress", IeeeAddr)]),
    CommandDef::sreq(
        "osalNvItemInit",
        0x07,
        &[
            p("id", U16),
            p("len", U16),
            p("initlen", U8),
            p("initvalue", Buffer),
        ],
        &[p("status", U8)],
    ),
    CommandDef::sreq(
        "osalNvRead",
        0x08,
        &[p("id", U16), p("offset", U8)],
        &[p("status", U8), p("len", U8), p("value", Buffer)],
    ),
    CommandDef::sreq(
        "osalNvWrite",
        0x09,
        &[p("id", U16), p("offset", U8), p("len", U8), p("value", Buffer)],
        &[p("status", U8)],
    ),
    CommandDef::sreq("random", 0x0C, &[], &[p("value", U16)]),
    CommandDef::ind(
        "resetInd",
        0x80,
        &[
            p("reason", U8),
            p("transportrev", U8),
            p("productid", U8),
            p("majorrel", U8),
            p("minorrel", U8),
            p("hwrev", U8),
        ],
    ),
];

static AF: &[CommandDef] = &[
    CommandDef::sreq(
        "register",
        0x00,
        &[
            p("endpoint", U8),
            p("appprofid", U16),
            p("appdeviceid", U16),
            p("appdevver", U8),
            p("latencyreq", U8),
            p("appnuminclusters", U8),
            p("appinclusterlist", ListU16),
            p("appnumoutclusters", U8),
            p("appoutclusterlist", ListU16),
        ],
        &[p("status", U8)],
    ),
    CommandDef::sreq(
        "dataRequest",
        0x01,
        &[
            p("dstaddr", U16),
            p("destendpoint", U8),
            p("srcendpoint", U8),
            p("clusterid", U16),
            p("transid", U8),
            p("options", U8),
            p("radius", U8),
            p("len", U8),
            p("data", Buffer),
        ],
        &[p("status", U8)],
    ),
    CommandDef::ind(
        "dataConfirm",
        0x80,
        &[p("status", U8), p("endpoint", U8), p("transid", U8)],
    ),
    CommandDef::ind(
        "incomingMsg",
        0x81,
        &[
            p("groupid", U16),
            p("clusterid", U16),
            p("srcaddr", U16),
            p("srcendpoint", U8),
            p("dstendpoint", U8),
            p("wasbroadcast", U8),
            p("linkquality", U8),
            p("securityuse", U8),
            p("timestamp", U32),
            p("transseqnumber", U8),
            p("len", U8),
            p("data", Buffer),
        ],
    ),
];

static ZDO: &[CommandDef] = &[
    CommandDef::sreq(
        "nodeDescReq",
        0x02,
        &[p("dstaddr", U16), p("nwkaddrofinterest", U16)],
        &[p("status", U8)],
    ),
    CommandDef::sreq(
        "activeEpReq",
        0x05,
        &[p("dstaddr", U16), p("nwkaddrofinterest", U16)],
        &[p("status", U8)],
    ),
    CommandDef::sreq(
        "bindReq",
        0x21,
        &[
            p("dstaddr", U16),
            p("srcaddr", IeeeAddr),
            p("srcendpoint", U8),
            p("clusterid", U16),
            p("dstaddrmode", U8),
            p("addr_short_long", IeeeAddr),
            p("dstendpoint", U8),
        ],
        &[p("status", U8)],
    ),
    CommandDef::sreq(
        "mgmtPermitJoinReq",
        0x36,
        &[
            p("addrmode", U8),
            p("dstaddr", U16),
            p("duration", U8),
            p("tcsignificance", U8),
        ],
        &[p("status", U8)],
    ),
    CommandDef::sreq(
        "startupFromApp",
        0x40,
        &[p("startdelay", U16)],
        &[p("status", U8)],
    ),
    CommandDef::ind("stateChangeInd", 0xC0, &[p("state", U8)]),
    CommandDef::ind(
        "endDeviceAnnceInd",
        0xC1,
        &[
            p("srcaddr", U16),
            p("nwkaddr", U16),
            p("ieeeaddr", IeeeAddr),
            p("capabilities", U8),
        ],
    ),
];

static UTIL: &[CommandDef] = &[
    CommandDef::sreq(
        "getDeviceInfo",
        0x00,
        &[],
        &[
            p("status", U8),
            p("ieeeaddr", IeeeAddr),
            p("shortaddr", U16),
            p("devicetype", U8),
            p("devicestate", U8),
            p("numassocdevices", U8),
            p("assocdeviceslist", ListU16),
        ],
    ),
    CommandDef::sreq(
        "ledControl",
        0x09,
        &[p("ledid", U8), p("mode", U8)],
        &[p("status", U8)],
    ),
];

static DBG: &[CommandDef] = &[CommandDef::areq(
    "msg",
    0x00,
    &[p("length", U8), p("string", Buffer)],
)];

static RES0: &[CommandDef] = &[CommandDef::ind(
    "rpcError",
    0x00,
    &[p("errcode", U8), p("reqcmd0", U8), p("reqcmd1", U8)],
)];

/// Commands of one subsystem; empty for subsystems without built-in entries
pub(crate) fn commands(subsystem: Subsystem) -> &'static [CommandDef] {
    match subsystem {
        Subsystem::Res0 => RES0,
        Subsystem::Sys => SYS,
        Subsystem::Af => AF,
        Subsystem::Zdo => ZDO,
        Subsystem::Util => UTIL,
        Subsystem::Dbg => DBG,
        _ => &[],
    }
}
